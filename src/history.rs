//! Builds and the walk back through them.
//!
//! Nothing stores coverage history. The trend of a node is rebuilt on demand
//! by stepping from its owning build to earlier ones, skipping failed builds,
//! and looking the node up again by name in each earlier report.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{ReportCache, ReportHandle};
use crate::db;
use crate::error::{ClovrError, Result};
use crate::identity::ReportIdentity;
use crate::model::{Coverage, CoverageNode, NodePath, ProjectCoverage};

/// Build number. Builds are ordered by number; a lower number is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildId(pub u64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Success,
    Unstable,
    Failure,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildOutcome::Success => "success",
            BuildOutcome::Unstable => "unstable",
            BuildOutcome::Failure => "failure",
        }
    }

    /// Combine with another result, keeping the worse of the two.
    pub fn combine(self, other: BuildOutcome) -> BuildOutcome {
        use BuildOutcome::*;
        match (self, other) {
            (Failure, _) | (_, Failure) => Failure,
            (Unstable, _) | (_, Unstable) => Unstable,
            _ => Success,
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildOutcome {
    type Err = ClovrError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(BuildOutcome::Success),
            "unstable" => Ok(BuildOutcome::Unstable),
            "failure" | "failed" => Ok(BuildOutcome::Failure),
            other => Err(ClovrError::Parse(format!(
                "Unknown build outcome '{other}'. Supported: success, unstable, failure"
            ))),
        }
    }
}

/// What the previous-result walk needs to know about builds.
pub trait BuildChain {
    /// The build immediately before `build`, failed or not.
    fn previous_build(&self, build: BuildId) -> Option<BuildId>;

    fn is_failure(&self, build: BuildId) -> bool;

    /// The coverage tree published on `build` under `identity`, if any.
    /// `Err` when such a report exists but cannot be loaded.
    fn attached_report(
        &self,
        build: BuildId,
        identity: &ReportIdentity,
    ) -> Result<Option<Arc<ProjectCoverage>>>;
}

/// A node together with the shared tree it lives in.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    root: Arc<ProjectCoverage>,
    path: NodePath,
}

impl ResolvedNode {
    pub fn project(root: Arc<ProjectCoverage>) -> Self {
        Self {
            root,
            path: NodePath::Project,
        }
    }

    pub fn package(root: Arc<ProjectCoverage>, name: &str) -> Option<Self> {
        let path = {
            let package = root.find_package_coverage(name)?;
            root.locate(&CoverageNode::Package(package))?
        };
        Some(Self { root, path })
    }

    pub fn file(root: Arc<ProjectCoverage>, name: &str) -> Option<Self> {
        let path = {
            let file = root.find_file_node(name)?;
            root.locate(&file)?
        };
        Some(Self { root, path })
    }

    /// Class addressed project-wide as `<package>.<class>`.
    pub fn class(root: Arc<ProjectCoverage>, qualified: &str) -> Option<Self> {
        let path = {
            let class = root.find_class_node(qualified)?;
            root.locate(&class)?
        };
        Some(Self { root, path })
    }

    pub fn root(&self) -> &Arc<ProjectCoverage> {
        &self.root
    }

    pub fn node(&self) -> CoverageNode<'_> {
        self.root.node_at(self.path)
    }

    /// Build that published this node's report.
    pub fn build(&self) -> Option<BuildId> {
        self.root.owner().map(|o| o.build)
    }

    pub fn previous_result(&self, chain: &dyn BuildChain) -> Option<ResolvedNode> {
        self.node().previous_result(chain)
    }

    /// Coverage of this node in this build and up to `limit - 1` earlier
    /// successful ones, newest first.
    pub fn trend(&self, chain: &dyn BuildChain, limit: usize) -> Vec<TrendPoint> {
        let mut points = Vec::new();
        let mut current = Some(self.clone());
        while let Some(resolved) = current {
            if points.len() >= limit {
                break;
            }
            let Some(build) = resolved.build() else {
                break;
            };
            let node = resolved.node();
            points.push(TrendPoint {
                build,
                method: node.method_coverage().percentage_float(),
                conditional: node.conditional_coverage().percentage_float(),
                statement: node.statement_coverage().percentage_float(),
            });
            current = node.previous_result(chain);
        }
        points
    }
}

/// One sample of a trend: percentages of a node on one build.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendPoint {
    pub build: BuildId,
    pub method: f64,
    pub conditional: f64,
    pub statement: f64,
}

impl CoverageNode<'_> {
    /// The same node in the nearest earlier, non-failed build that published
    /// a report with the same identity.
    ///
    /// `None` when the node has no owner, when no such build exists, when
    /// that build's report has no node with this name, or when that report
    /// fails to load. A load failure ends the walk; older builds are not
    /// consulted.
    pub fn previous_result(&self, chain: &dyn BuildChain) -> Option<ResolvedNode> {
        let owner = self.owner()?;
        let mut build = owner.build;
        loop {
            build = chain.previous_build(build)?;
            if chain.is_failure(build) {
                debug!(%build, "skipping failed build");
                continue;
            }
            match chain.attached_report(build, &owner.identity) {
                Ok(Some(root)) => {
                    let path = root.locate(self)?;
                    return Some(ResolvedNode { root, path });
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(%build, identity = %owner.identity, error = %e, "could not load earlier report");
                    return None;
                }
            }
        }
    }
}

/// A build and the reports published on it.
#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub id: BuildId,
    pub outcome: BuildOutcome,
    reports: Vec<Arc<ReportHandle>>,
}

impl BuildRecord {
    pub fn reports(&self) -> &[Arc<ReportHandle>] {
        &self.reports
    }

    pub fn identities(&self) -> Vec<ReportIdentity> {
        self.reports.iter().map(|r| r.identity.clone()).collect()
    }
}

/// In-memory build registry backed by a [`ReportCache`].
///
/// The registry owns the report handles. Dropping a build drops its handles,
/// which lets the cache release their trees.
pub struct Builds {
    records: BTreeMap<BuildId, BuildRecord>,
    cache: Arc<ReportCache>,
}

impl Builds {
    pub fn new(cache: Arc<ReportCache>) -> Self {
        Self {
            records: BTreeMap::new(),
            cache,
        }
    }

    /// Load every build and report handle from the store.
    pub fn from_store(conn: &Connection, cache: Arc<ReportCache>) -> Result<Self> {
        let mut builds = Self::new(cache);
        for row in db::list_builds(conn)? {
            builds.add_build(row.id, row.outcome);
            for handle in db::reports_for_build(conn, row.id)? {
                builds.attach(handle)?;
            }
        }
        Ok(builds)
    }

    pub fn cache(&self) -> &Arc<ReportCache> {
        &self.cache
    }

    /// Register a build. An existing build keeps its reports and takes the
    /// new outcome.
    pub fn add_build(&mut self, id: BuildId, outcome: BuildOutcome) {
        self.records
            .entry(id)
            .and_modify(|r| r.outcome = outcome)
            .or_insert_with(|| BuildRecord {
                id,
                outcome,
                reports: Vec::new(),
            });
    }

    pub fn remove_build(&mut self, id: BuildId) -> Option<BuildRecord> {
        self.records.remove(&id)
    }

    pub fn set_outcome(&mut self, id: BuildId, outcome: BuildOutcome) -> Result<()> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(ClovrError::BuildNotFound(id.0))?;
        record.outcome = outcome;
        Ok(())
    }

    pub fn get(&self, id: BuildId) -> Option<&BuildRecord> {
        self.records.get(&id)
    }

    pub fn latest(&self) -> Option<BuildId> {
        self.records.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Attach a report handle to its build. Identities are unique per build.
    pub fn attach(&mut self, handle: ReportHandle) -> Result<Arc<ReportHandle>> {
        let record = self
            .records
            .get_mut(&handle.build)
            .ok_or(ClovrError::BuildNotFound(handle.build.0))?;
        if record.reports.iter().any(|r| r.identity == handle.identity) {
            return Err(ClovrError::DuplicateIdentity {
                build: handle.build.0,
                identity: handle.identity.to_string(),
            });
        }
        let handle = Arc::new(handle);
        record.reports.push(Arc::clone(&handle));
        Ok(handle)
    }

    pub fn handle(&self, build: BuildId, identity: &ReportIdentity) -> Option<&Arc<ReportHandle>> {
        self.records
            .get(&build)?
            .reports
            .iter()
            .find(|r| &r.identity == identity)
    }

    /// The coverage tree of one report, loaded through the cache.
    pub fn report(&self, build: BuildId, identity: &ReportIdentity) -> Result<Arc<ProjectCoverage>> {
        if !self.records.contains_key(&build) {
            return Err(ClovrError::BuildNotFound(build.0));
        }
        let handle = self.handle(build, identity).ok_or_else(|| {
            ClovrError::ReportNotFound(format!("{} on build {}", identity.display_name(), build))
        })?;
        self.cache.get(handle)
    }
}

impl BuildChain for Builds {
    fn previous_build(&self, build: BuildId) -> Option<BuildId> {
        self.records.range(..build).next_back().map(|(id, _)| *id)
    }

    fn is_failure(&self, build: BuildId) -> bool {
        self.records
            .get(&build)
            .is_some_and(|r| r.outcome == BuildOutcome::Failure)
    }

    fn attached_report(
        &self,
        build: BuildId,
        identity: &ReportIdentity,
    ) -> Result<Option<Arc<ProjectCoverage>>> {
        match self.handle(build, identity) {
            Some(handle) => self.cache.get(handle).map(Some),
            None => Ok(None),
        }
    }
}
