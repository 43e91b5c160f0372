//! Command handler functions for the clovr CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::Path;

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::db;
use crate::health::build_health;
use crate::history::{BuildId, BuildOutcome, Builds, ResolvedNode};
use crate::identity::ReportIdentity;
use crate::model::Coverage;
use crate::publish::{publish, PublishOutcome, PublishRequest, SkipReason};
use crate::target::CoverageMetric;

/// Which node of a report a command looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    Project,
    Package(String),
    File(String),
    /// Project-wide class name, `<package>.<class>`.
    Class(String),
}

impl NodeSelector {
    pub fn from_flags(
        package: Option<String>,
        file: Option<String>,
        class: Option<String>,
    ) -> Self {
        match (class, file, package) {
            (Some(c), _, _) => NodeSelector::Class(c),
            (None, Some(f), _) => NodeSelector::File(f),
            (None, None, Some(p)) => NodeSelector::Package(p),
            (None, None, None) => NodeSelector::Project,
        }
    }
}

/// Build and identity a command refers to: the given build, or the latest.
fn resolve_report(
    builds: &Builds,
    build: Option<u64>,
    identity: Option<&str>,
) -> Result<(BuildId, ReportIdentity)> {
    let build = match build {
        Some(n) => BuildId(n),
        None => builds
            .latest()
            .ok_or_else(|| anyhow!("No builds found in database"))?,
    };
    let identity = ReportIdentity::parse(identity.unwrap_or(""))?;
    Ok((build, identity))
}

pub fn cmd_new_build(conn: &Connection, number: Option<u64>) -> Result<String> {
    let id = db::create_build(conn, number)?;
    Ok(format!("Created build {id}\n"))
}

pub fn cmd_finish(
    conn: &Connection,
    builds: &mut Builds,
    build: u64,
    outcome: BuildOutcome,
) -> Result<String> {
    let id = BuildId(build);
    db::set_outcome(conn, id, outcome)?;
    builds.add_build(id, outcome);
    Ok(format!("Build {id} marked {outcome}\n"))
}

pub fn cmd_publish(
    conn: &mut Connection,
    builds: &mut Builds,
    data_dir: &Path,
    request: &PublishRequest,
) -> Result<String> {
    let mut out = String::new();
    match publish(conn, builds, data_dir, request)? {
        PublishOutcome::Skipped(reason) => {
            let why = match reason {
                SkipReason::BuildFailed => "build failure",
                SkipReason::MissingReport => "missing report",
            };
            writeln!(out, "No Clover report will be published due to a {why}")?;
        }
        PublishOutcome::Published(report) => {
            writeln!(
                out,
                "Published {} on build {} as '{}'",
                report.identity.display_name(),
                request.build,
                report.url_name
            )?;
            if let Some(health) = &report.health {
                writeln!(out, "Health:     {health}")?;
            }
            if !report.failing_metrics.is_empty() {
                writeln!(out, "Code coverage enforcement failed for the following metrics:")?;
                for metric in &report.failing_metrics {
                    writeln!(out, "    {metric}")?;
                }
                writeln!(out, "Build {} is now {}", request.build, report.outcome)?;
            }
        }
    }
    Ok(out)
}

pub fn cmd_reports(conn: &Connection) -> Result<String> {
    let builds = db::list_builds(conn)?;
    if builds.is_empty() {
        return Ok("No builds in database.\n".to_string());
    }
    let mut out = String::new();
    writeln!(out, "{:<8} {:<10} {:<27} REPORTS", "BUILD", "OUTCOME", "CREATED")?;
    writeln!(out, "{}", "-".repeat(70))?;
    for build in &builds {
        let names: Vec<String> = db::identities_for_build(conn, build.id)?
            .iter()
            .map(ReportIdentity::url_name)
            .collect();
        let reports = if names.is_empty() {
            "-".to_string()
        } else {
            names.join(", ")
        };
        writeln!(
            out,
            "{:<8} {:<10} {:<27} {}",
            build.id.0, build.outcome, build.created_at, reports
        )?;
    }
    Ok(out)
}

fn write_metric_rows<C: Coverage + ?Sized>(out: &mut String, node: &C) -> Result<()> {
    for metric in CoverageMetric::ALL {
        let ratio = node.coverage(metric);
        let label = format!("{metric}:");
        writeln!(
            out,
            "{:<14} {:>12} {:>7}  (uncovered {})",
            label,
            ratio.to_string(),
            ratio.percentage_string(),
            ratio.uncovered_percentage_string()
        )?;
    }
    Ok(())
}

pub fn cmd_summary(builds: &Builds, build: Option<u64>, identity: Option<&str>) -> Result<String> {
    let (build, identity) = resolve_report(builds, build, identity)?;
    let tree = builds.report(build, &identity)?;

    let mut out = String::new();
    writeln!(out, "Report:       {}", identity.display_name())?;
    writeln!(out, "Build:        {build}")?;
    writeln!(out, "Project:      {}", tree.name())?;
    writeln!(
        out,
        "Size:         {} packages, {} files, {} classes, {} LOC ({} NCLOC)",
        tree.package_coverages().len(),
        tree.files,
        tree.classes,
        tree.loc,
        tree.ncloc
    )?;
    write_metric_rows(&mut out, &*tree)?;
    Ok(out)
}

pub fn cmd_health(builds: &Builds, build: Option<u64>, identity: Option<&str>) -> Result<String> {
    let (build, identity) = resolve_report(builds, build, identity)?;
    let handle = builds
        .handle(build, &identity)
        .ok_or_else(|| anyhow!("No {} on build {}", identity.display_name(), build))?;
    let tree = builds.report(build, &identity)?;
    let health = build_health(
        handle.healthy_target.as_ref(),
        handle.unhealthy_target.as_ref(),
        &*tree,
    );
    Ok(match health {
        Some(h) => format!("{h}\n"),
        None => "No health report: healthy and unhealthy targets are not both configured.\n"
            .to_string(),
    })
}

pub fn cmd_packages(builds: &Builds, build: Option<u64>, identity: Option<&str>) -> Result<String> {
    let (build, identity) = resolve_report(builds, build, identity)?;
    let tree = builds.report(build, &identity)?;

    let mut out = String::new();
    writeln!(
        out,
        "{:<40} {:>8} {:>13} {:>11} {:>9}",
        "PACKAGE", "METHODS", "CONDITIONALS", "STATEMENTS", "ELEMENTS"
    )?;
    writeln!(out, "{}", "-".repeat(85))?;
    for package in tree.package_coverages() {
        writeln!(
            out,
            "{:<40} {:>8} {:>13} {:>11} {:>9}",
            package.name(),
            package.method_coverage().percentage_string(),
            package.conditional_coverage().percentage_string(),
            package.statement_coverage().percentage_string(),
            package.element_coverage().percentage_string()
        )?;
    }
    Ok(out)
}

pub fn cmd_trend(
    builds: &Builds,
    build: Option<u64>,
    identity: Option<&str>,
    selector: &NodeSelector,
    limit: usize,
) -> Result<String> {
    let (build, identity) = resolve_report(builds, build, identity)?;
    let tree = builds.report(build, &identity)?;
    let resolved = match selector {
        NodeSelector::Project => Some(ResolvedNode::project(tree)),
        NodeSelector::Package(name) => ResolvedNode::package(tree, name),
        NodeSelector::File(name) => ResolvedNode::file(tree, name),
        NodeSelector::Class(name) => ResolvedNode::class(tree, name),
    }
    .ok_or_else(|| anyhow!("{selector:?} not found in build {build}"))?;

    let mut out = String::new();
    writeln!(out, "Trend for {}", resolved.node().qualified_name())?;
    writeln!(
        out,
        "{:<8} {:>9} {:>13} {:>11}",
        "BUILD", "METHODS", "CONDITIONALS", "STATEMENTS"
    )?;
    for point in resolved.trend(builds, limit) {
        writeln!(
            out,
            "{:<8} {:>8.1}% {:>12.1}% {:>10.1}%",
            point.build.0, point.method, point.conditional, point.statement
        )?;
    }
    Ok(out)
}
