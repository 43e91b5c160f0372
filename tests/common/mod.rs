#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clovr::cache::{ReportCache, ReportHandle, ReportLoader};
use clovr::error::Result;
use clovr::history::BuildId;
use clovr::identity::ReportIdentity;
use clovr::model::ProjectCoverage;
use clovr::parsers::clover::CloverXmlLoader;
use clovr::publish::PublishRequest;
use clovr::target::CoverageTarget;
use rusqlite::Connection;
use tempfile::TempDir;

/// Create a fresh temporary database, returning the connection, dir handle, and db path.
/// The caller must hold onto `TempDir` to keep the temp directory alive.
pub fn setup_db() -> (Connection, TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let conn = clovr::db::open(&db_path).unwrap();
    clovr::db::init_schema(&conn).unwrap();
    (conn, dir, db_path)
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Copy fixture `name` into `<workspace>/<report_dir>/clover.xml`, with the
/// `WORKSPACE` placeholder pointing at `workspace`.
pub fn stage_report(workspace: &Path, report_dir: &str, name: &str) {
    let xml = std::fs::read_to_string(fixture(name)).unwrap();
    let xml = xml.replace("WORKSPACE", &workspace.to_string_lossy());
    let dir = workspace.join(report_dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("clover.xml"), xml).unwrap();
}

pub fn clover_cache() -> Arc<ReportCache> {
    Arc::new(ReportCache::new(Arc::new(CloverXmlLoader)))
}

pub fn request(workspace: &Path, build: u64) -> PublishRequest {
    PublishRequest {
        build: BuildId(build),
        workspace: workspace.to_path_buf(),
        report_dir: PathBuf::from("target/clover"),
        report_file_name: None,
        identity: None,
        healthy: CoverageTarget::default_healthy(),
        unhealthy: CoverageTarget::new(Some(0), Some(0), Some(0)),
        failing: CoverageTarget::default(),
    }
}

pub fn handle(build: u64, identity: &str) -> Arc<ReportHandle> {
    Arc::new(ReportHandle {
        build: BuildId(build),
        identity: ReportIdentity::parse(identity).unwrap(),
        workspace_path: "/ws/".to_string(),
        report_path: PathBuf::from(format!("/archive/{build}/clover.xml")),
        healthy_target: None,
        unhealthy_target: None,
    })
}

/// Loader that counts its calls and names each tree after the handle's
/// build, optionally sleeping to widen race windows.
pub struct CountingLoader {
    pub calls: AtomicUsize,
    pub delay: std::time::Duration,
}

impl CountingLoader {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReportLoader for CountingLoader {
    fn load(&self, handle: &ReportHandle) -> Result<ProjectCoverage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(ProjectCoverage::new(format!("build-{}", handle.build.0)))
    }
}
