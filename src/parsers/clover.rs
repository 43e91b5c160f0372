//! Parser for Clover XML coverage reports.
//!
//! Clover XML structure (OpenClover, Atlassian Clover and the Maven/Ant
//! plugins):
//!
//!   <coverage generated="..." clover="4.x.x">
//!     <project timestamp="..." name="...">
//!       <metrics methods="..." coveredmethods="..." .../>
//!       <package name="a.b">
//!         <metrics .../>
//!         <file name="C.java" path="/abs/path/a/b/C.java">
//!           <metrics .../>
//!           <class name="C"><metrics .../></class>
//!           <line num="1" count="5" type="stmt"/>
//!         </file>
//!       </package>
//!     </project>
//!     <testproject>...</testproject>
//!   </coverage>
//!
//! Only `coverage/project` and its package/file/class descendants become
//! tree nodes; each takes its counters from its own `<metrics>` child.
//! `<testproject>`, `<line>` elements and files placed directly under the
//! project are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use super::{get_attr, parse_count, xml_err, xml_reader};
use crate::cache::{ReportHandle, ReportLoader};
use crate::error::{ClovrError, Result};
use crate::model::*;

/// Loads the archived report a handle points at.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloverXmlLoader;

impl ReportLoader for CloverXmlLoader {
    fn load(&self, handle: &ReportHandle) -> Result<ProjectCoverage> {
        load_report(&handle.report_path, &handle.workspace_path, &handle.owner())
    }
}

/// Parse the report at `path`, make its file names relative to `workspace`
/// and stamp every node with `owner`.
pub fn load_report(path: &Path, workspace: &str, owner: &Owner) -> Result<ProjectCoverage> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ClovrError::ReportNotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    info!(path = %path.display(), "parsing Clover report");
    let mut project = parse_reader(BufReader::new(file))?;
    project.trim_paths(workspace);
    project.set_owner(owner);
    debug!(
        packages = project.package_coverages().len(),
        "parsed Clover report"
    );
    Ok(project)
}

/// Parse Clover XML from raw bytes.
pub fn parse(input: &[u8]) -> Result<ProjectCoverage> {
    parse_reader(input)
}

/// One open element on the way down the document.
enum Frame {
    Coverage,
    Project(ProjectCoverage),
    Package(PackageCoverage),
    File(FileCoverage),
    Class(ClassCoverage),
    /// Anything that does not map to a node.
    Skip,
}

/// Streaming parser: builds the tree as elements close.
pub fn parse_reader<R: BufRead>(input: R) -> Result<ProjectCoverage> {
    let mut xml = xml_reader(input);
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut project: Option<ProjectCoverage> = None;

    loop {
        match xml.read_event_into(&mut buf) {
            Err(e) => return Err(xml_err(e, &xml)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) => {
                let frame = open(e, &mut stack);
                stack.push(frame);
            }
            Ok(Event::Empty(ref e)) => {
                let frame = open(e, &mut stack);
                close(frame, &mut stack, &mut project);
            }
            Ok(Event::End(_)) => {
                if let Some(frame) = stack.pop() {
                    close(frame, &mut stack, &mut project);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    project.ok_or_else(|| {
        ClovrError::Parse("No <coverage>/<project> element in Clover report".to_string())
    })
}

/// Frame for a newly opened element. `<metrics>` is applied to the node
/// that encloses it right away.
fn open(e: &BytesStart<'_>, stack: &mut [Frame]) -> Frame {
    let name = e.name();
    let parent = stack.last_mut();
    match (name.as_ref(), parent) {
        (b"coverage", None) => Frame::Coverage,
        (b"project", Some(Frame::Coverage)) => {
            Frame::Project(ProjectCoverage::new(get_attr(e, b"name").unwrap_or_default()))
        }
        (b"package", Some(Frame::Project(_))) => {
            Frame::Package(PackageCoverage::new(get_attr(e, b"name").unwrap_or_default()))
        }
        (b"file", Some(Frame::Package(_))) => {
            // Prefer the `path` attribute (absolute) over `name`.
            let path = get_attr(e, b"path")
                .or_else(|| get_attr(e, b"name"))
                .unwrap_or_default();
            Frame::File(FileCoverage::new(path))
        }
        (b"class", Some(Frame::File(_))) => {
            Frame::Class(ClassCoverage::new(get_attr(e, b"name").unwrap_or_default()))
        }
        (b"metrics", Some(parent)) => {
            apply_metrics(e, parent);
            Frame::Skip
        }
        _ => Frame::Skip,
    }
}

/// Hand a finished node to its parent, or keep it as the result when it is
/// the project. The first project wins.
fn close(frame: Frame, stack: &mut [Frame], project: &mut Option<ProjectCoverage>) {
    match (frame, stack.last_mut()) {
        (Frame::Class(class), Some(Frame::File(file))) => {
            file.add_class_coverage(class);
        }
        (Frame::File(f), Some(Frame::Package(package))) => {
            package.add_file_coverage(f);
        }
        (Frame::Package(p), Some(Frame::Project(parent))) => {
            parent.add_package_coverage(p);
        }
        (Frame::Project(p), _) => {
            if project.is_none() {
                *project = Some(p);
            }
        }
        _ => {}
    }
}

/// Every counter a `<metrics>` element may carry.
#[derive(Default)]
struct MetricAttrs {
    methods: u64,
    covered_methods: u64,
    conditionals: u64,
    covered_conditionals: u64,
    statements: u64,
    covered_statements: u64,
    elements: u64,
    covered_elements: u64,
    loc: u64,
    ncloc: u64,
    classes: u64,
    files: u64,
    packages: u64,
}

impl MetricAttrs {
    fn read(e: &BytesStart<'_>) -> Self {
        let mut m = MetricAttrs::default();
        for attr in e.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            let slot = match attr.key.as_ref() {
                b"methods" => &mut m.methods,
                b"coveredmethods" => &mut m.covered_methods,
                b"conditionals" => &mut m.conditionals,
                b"coveredconditionals" => &mut m.covered_conditionals,
                b"statements" => &mut m.statements,
                b"coveredstatements" => &mut m.covered_statements,
                b"elements" => &mut m.elements,
                b"coveredelements" => &mut m.covered_elements,
                b"loc" => &mut m.loc,
                b"ncloc" => &mut m.ncloc,
                b"classes" => &mut m.classes,
                b"files" => &mut m.files,
                b"packages" => &mut m.packages,
                _ => continue,
            };
            *slot = parse_count(&value);
        }
        m
    }

    fn copy_into(&self, metrics: &mut Metrics) {
        metrics.methods = self.methods;
        metrics.covered_methods = self.covered_methods;
        metrics.conditionals = self.conditionals;
        metrics.covered_conditionals = self.covered_conditionals;
        metrics.statements = self.statements;
        metrics.covered_statements = self.covered_statements;
        metrics.elements = self.elements;
        metrics.covered_elements = self.covered_elements;
    }
}

fn apply_metrics(e: &BytesStart<'_>, node: &mut Frame) {
    let m = MetricAttrs::read(e);
    match node {
        Frame::Project(p) => {
            m.copy_into(&mut p.metrics);
            p.loc = m.loc;
            p.ncloc = m.ncloc;
            p.classes = m.classes;
            p.files = m.files;
            p.packages = m.packages;
        }
        Frame::Package(p) => {
            m.copy_into(&mut p.metrics);
            p.loc = m.loc;
            p.ncloc = m.ncloc;
            p.classes = m.classes;
            p.files = m.files;
        }
        Frame::File(f) => {
            m.copy_into(&mut f.metrics);
            f.loc = m.loc;
            f.ncloc = m.ncloc;
            f.classes = m.classes;
        }
        Frame::Class(c) => m.copy_into(&mut c.metrics),
        Frame::Coverage | Frame::Skip => {}
    }
}
