//! Publishing a Clover report onto a build.
//!
//! Locate the XML in the workspace, archive it next to the build, parse it,
//! record it, and let the failing target degrade the build.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::cache::ReportHandle;
use crate::db;
use crate::error::{ClovrError, Result};
use crate::health::{build_health, HealthReport};
use crate::history::{BuildId, BuildOutcome, Builds};
use crate::identity::{resolve_identity, ReportIdentity};
use crate::parsers::clover::load_report;
use crate::target::{CoverageMetric, CoverageTarget};

pub const DEFAULT_REPORT_FILE_NAME: &str = "clover.xml";

/// What to publish and how to judge it.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub build: BuildId,
    /// Checkout the report was produced in. File names in the report are
    /// made relative to it.
    pub workspace: PathBuf,
    /// Report directory, relative to the workspace.
    pub report_dir: PathBuf,
    /// Defaults to `clover.xml` when empty.
    pub report_file_name: Option<String>,
    /// Explicit report identity. A fresh one is assigned when absent.
    pub identity: Option<String>,
    pub healthy: CoverageTarget,
    pub unhealthy: CoverageTarget,
    pub failing: CoverageTarget,
}

impl PublishRequest {
    pub fn report_file_name(&self) -> &str {
        self.report_file_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_REPORT_FILE_NAME)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BuildFailed,
    MissingReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedReport {
    pub identity: ReportIdentity,
    pub url_name: String,
    /// Where the report was archived.
    pub archived_path: PathBuf,
    pub failing_metrics: BTreeSet<CoverageMetric>,
    pub health: Option<HealthReport>,
    /// Build outcome after publishing.
    pub outcome: BuildOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(PublishedReport),
    Skipped(SkipReason),
}

/// Look for `name` in `start_dir`, then in each of its immediate
/// subdirectories (in name order). The first hit wins. When nothing matches
/// the path inside `start_dir` is returned anyway.
pub fn find_one_dir_deep(start_dir: &Path, name: &str) -> PathBuf {
    let direct = start_dir.join(name);
    if direct.exists() {
        return direct;
    }
    let mut dirs: Vec<PathBuf> = match fs::read_dir(start_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => return direct,
    };
    dirs.sort();
    dirs.into_iter()
        .map(|d| d.join(name))
        .find(|candidate| candidate.exists())
        .unwrap_or(direct)
}

/// Directory a build's archived reports live in.
pub fn archive_dir(data_dir: &Path, build: BuildId) -> PathBuf {
    data_dir.join("builds").join(build.0.to_string())
}

fn with_trailing_separator(path: &Path) -> String {
    let s = path.to_string_lossy().into_owned();
    if s.ends_with('/') || s.ends_with(MAIN_SEPARATOR) {
        s
    } else {
        format!("{s}{MAIN_SEPARATOR}")
    }
}

/// Publish one report onto `request.build`.
///
/// Nothing is published when the build already failed or the report cannot
/// be found; that is reported as [`PublishOutcome::Skipped`], not an error.
pub fn publish(
    conn: &mut Connection,
    builds: &mut Builds,
    data_dir: &Path,
    request: &PublishRequest,
) -> Result<PublishOutcome> {
    let build = db::get_build(conn, request.build)?
        .ok_or(ClovrError::BuildNotFound(request.build.0))?;

    let mut report_dir = request.workspace.join(&request.report_dir);
    if !report_dir.exists() {
        report_dir = find_one_dir_deep(&request.workspace, &request.report_dir.to_string_lossy());
    }

    if build.outcome == BuildOutcome::Failure {
        info!(build = %build.id, "build failed, no Clover report will be published");
        return Ok(PublishOutcome::Skipped(SkipReason::BuildFailed));
    }
    let xml = find_one_dir_deep(&report_dir, request.report_file_name());
    if !xml.is_file() {
        warn!(
            path = %xml.display(),
            "Clover XML report not found. Did you generate the XML report for Clover?"
        );
        return Ok(PublishOutcome::Skipped(SkipReason::MissingReport));
    }

    let existing = db::identities_for_build(conn, build.id)?;
    let identity = resolve_identity(build.id, request.identity.as_deref(), &existing)?;

    let dest_dir = archive_dir(data_dir, build.id);
    fs::create_dir_all(&dest_dir)?;
    let archived_path = dest_dir.join(identity.xml_file_name());
    fs::copy(&xml, &archived_path)?;
    info!(from = %xml.display(), to = %archived_path.display(), "archived Clover XML report");

    let handle = ReportHandle {
        build: build.id,
        identity: identity.clone(),
        workspace_path: with_trailing_separator(&request.workspace),
        report_path: archived_path.clone(),
        healthy_target: Some(request.healthy),
        unhealthy_target: Some(request.unhealthy),
    };
    let tree = load_report(&archived_path, &handle.workspace_path, &handle.owner())?;

    let failing_metrics = request.failing.failing_metrics(&tree);
    let health = build_health(Some(&request.healthy), Some(&request.unhealthy), &tree);

    db::attach_report(conn, &handle)?;
    builds.add_build(build.id, build.outcome);
    let handle = builds.attach(handle)?;
    builds.cache().put(&handle, tree);

    let mut outcome = build.outcome;
    if !failing_metrics.is_empty() {
        let names: Vec<&str> = failing_metrics.iter().map(CoverageMetric::as_str).collect();
        warn!(
            build = %build.id,
            metrics = %names.join(", "),
            "code coverage enforcement failed, setting build to unstable"
        );
        outcome = outcome.combine(BuildOutcome::Unstable);
        db::set_outcome(conn, build.id, outcome)?;
        builds.set_outcome(build.id, outcome)?;
    }

    Ok(PublishOutcome::Published(PublishedReport {
        url_name: identity.url_name(),
        identity,
        archived_path,
        failing_metrics,
        health,
        outcome,
    }))
}
