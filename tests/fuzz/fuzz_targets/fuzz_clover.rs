#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must not panic on any input.
    if let Ok(mut project) = clovr::parsers::clover::parse(data) {
        project.trim_paths("/ws/");
        let _ = clovr::target::CoverageTarget::default_healthy().failing_metrics(&project);
    }
});
