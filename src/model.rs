//! In-memory coverage tree for one report: project → package → file → class.
//!
//! The loader builds the tree bottom-up and hands it to the cache, which
//! shares it behind an `Arc`. From then on nothing can add or remove nodes,
//! so the index-based [`NodePath`]s resolved against a tree stay valid for
//! its whole lifetime.

use crate::history::BuildId;
use crate::identity::ReportIdentity;
use crate::ratio::Ratio;
use crate::target::CoverageMetric;

/// The report a node belongs to: the owning build plus the identity of the
/// report on that build. A lookup handle only; the tree never owns a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub build: BuildId,
    pub identity: ReportIdentity,
}

/// Counters shared by every node of the tree.
///
/// `covered <= total` is not enforced; ratio math tolerates malformed input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
    pub name: String,
    pub methods: u64,
    pub covered_methods: u64,
    pub conditionals: u64,
    pub covered_conditionals: u64,
    pub statements: u64,
    pub covered_statements: u64,
    pub elements: u64,
    pub covered_elements: u64,
    owner: Option<Owner>,
}

impl Metrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Read access to the metrics of any tree node.
pub trait Coverage {
    fn metrics(&self) -> &Metrics;

    fn name(&self) -> &str {
        &self.metrics().name
    }

    fn owner(&self) -> Option<&Owner> {
        self.metrics().owner.as_ref()
    }

    fn method_coverage(&self) -> Ratio {
        let m = self.metrics();
        Ratio::create(m.covered_methods as f64, m.methods as f64)
    }

    fn conditional_coverage(&self) -> Ratio {
        let m = self.metrics();
        Ratio::create(m.covered_conditionals as f64, m.conditionals as f64)
    }

    fn statement_coverage(&self) -> Ratio {
        let m = self.metrics();
        Ratio::create(m.covered_statements as f64, m.statements as f64)
    }

    fn element_coverage(&self) -> Ratio {
        let m = self.metrics();
        Ratio::create(m.covered_elements as f64, m.elements as f64)
    }

    fn coverage(&self, metric: CoverageMetric) -> Ratio {
        match metric {
            CoverageMetric::Method => self.method_coverage(),
            CoverageMetric::Conditional => self.conditional_coverage(),
            CoverageMetric::Statement => self.statement_coverage(),
            CoverageMetric::Element => self.element_coverage(),
        }
    }
}

impl Coverage for Metrics {
    fn metrics(&self) -> &Metrics {
        self
    }
}

/// Insert `item` keeping insertion order and unique names. A duplicate name
/// replaces the earlier node in place; returns whether the name was new.
fn insert_unique<T: Coverage>(items: &mut Vec<T>, item: T) -> bool {
    match items.iter().position(|i| i.name() == item.name()) {
        Some(idx) => {
            items[idx] = item;
            false
        }
        None => {
            items.push(item);
            true
        }
    }
}

/// Leaf node: a single class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCoverage {
    pub metrics: Metrics,
}

impl ClassCoverage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metrics: Metrics::new(name),
        }
    }

    pub fn set_owner(&mut self, owner: &Owner) {
        self.metrics.owner = Some(owner.clone());
    }
}

impl Coverage for ClassCoverage {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// A source file and the classes declared in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCoverage {
    pub metrics: Metrics,
    pub loc: u64,
    pub ncloc: u64,
    pub classes: u64,
    class_coverages: Vec<ClassCoverage>,
}

impl FileCoverage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metrics: Metrics::new(name),
            ..Default::default()
        }
    }

    pub fn add_class_coverage(&mut self, class: ClassCoverage) -> bool {
        insert_unique(&mut self.class_coverages, class)
    }

    pub fn class_coverages(&self) -> &[ClassCoverage] {
        &self.class_coverages
    }

    pub fn find_class_coverage(&self, name: &str) -> Option<&ClassCoverage> {
        self.class_coverages.iter().find(|c| c.name() == name)
    }

    pub fn set_owner(&mut self, owner: &Owner) {
        self.metrics.owner = Some(owner.clone());
        for class in &mut self.class_coverages {
            class.set_owner(owner);
        }
    }
}

impl Coverage for FileCoverage {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// A package and its files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageCoverage {
    pub metrics: Metrics,
    pub loc: u64,
    pub ncloc: u64,
    pub classes: u64,
    pub files: u64,
    file_coverages: Vec<FileCoverage>,
}

impl PackageCoverage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metrics: Metrics::new(name),
            ..Default::default()
        }
    }

    pub fn add_file_coverage(&mut self, file: FileCoverage) -> bool {
        insert_unique(&mut self.file_coverages, file)
    }

    pub fn file_coverages(&self) -> &[FileCoverage] {
        &self.file_coverages
    }

    pub fn find_file_coverage(&self, name: &str) -> Option<&FileCoverage> {
        self.file_coverages.iter().find(|f| f.name() == name)
    }

    /// First class named `name` in any file of this package.
    pub fn find_class_coverage(&self, name: &str) -> Option<&ClassCoverage> {
        self.file_coverages
            .iter()
            .find_map(|f| f.find_class_coverage(name))
    }

    /// Resolve one `/`-delimited path segment against this package's file
    /// names. See [`PathEntry`].
    pub fn resolve_path(&self, token: &str) -> Option<PathEntry<'_>> {
        resolve_segment(self, token.to_string())
    }

    pub fn set_owner(&mut self, owner: &Owner) {
        self.metrics.owner = Some(owner.clone());
        for file in &mut self.file_coverages {
            file.set_owner(owner);
        }
    }

    fn locate_class(&self, name: &str) -> Option<(usize, usize)> {
        self.file_coverages.iter().enumerate().find_map(|(fi, f)| {
            f.class_coverages
                .iter()
                .position(|c| c.name() == name)
                .map(|ci| (fi, ci))
        })
    }
}

impl Coverage for PackageCoverage {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Result of resolving a path segment inside a package.
#[derive(Debug, Clone)]
pub enum PathEntry<'a> {
    /// The path named a file exactly.
    File(&'a FileCoverage),
    /// The path is a directory prefix of one or more files.
    Directory(PathMapper<'a>),
}

/// An intermediate directory inside a package, bound to a path prefix.
#[derive(Debug, Clone)]
pub struct PathMapper<'a> {
    package: &'a PackageCoverage,
    prefix: String,
}

impl<'a> PathMapper<'a> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the next segment below this directory.
    pub fn resolve(&self, token: &str) -> Option<PathEntry<'a>> {
        resolve_segment(self.package, format!("{}/{}", self.prefix, token))
    }

    /// Files anywhere below this directory.
    pub fn files(&self) -> impl Iterator<Item = &'a FileCoverage> + '_ {
        let dir = format!("{}/", self.prefix);
        self.package
            .file_coverages
            .iter()
            .filter(move |f| f.name().starts_with(&dir))
    }
}

fn resolve_segment(package: &PackageCoverage, path: String) -> Option<PathEntry<'_>> {
    if let Some(file) = package.find_file_coverage(&path) {
        return Some(PathEntry::File(file));
    }
    let dir = format!("{path}/");
    package
        .file_coverages
        .iter()
        .any(|f| f.name().starts_with(&dir))
        .then(|| {
            PathEntry::Directory(PathMapper {
                package,
                prefix: path,
            })
        })
}

/// Root of the tree: the whole project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectCoverage {
    pub metrics: Metrics,
    pub loc: u64,
    pub ncloc: u64,
    pub classes: u64,
    pub files: u64,
    pub packages: u64,
    package_coverages: Vec<PackageCoverage>,
}

impl ProjectCoverage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metrics: Metrics::new(name),
            ..Default::default()
        }
    }

    pub fn add_package_coverage(&mut self, package: PackageCoverage) -> bool {
        insert_unique(&mut self.package_coverages, package)
    }

    pub fn package_coverages(&self) -> &[PackageCoverage] {
        &self.package_coverages
    }

    pub fn find_package_coverage(&self, name: &str) -> Option<&PackageCoverage> {
        self.package_coverages.iter().find(|p| p.name() == name)
    }

    /// First file named `name` in any package.
    pub fn find_file_coverage(&self, name: &str) -> Option<&FileCoverage> {
        self.package_coverages
            .iter()
            .find_map(|p| p.find_file_coverage(name))
    }

    /// Find a class by its project-wide name `<package>.<class>`.
    pub fn find_class_coverage(&self, qualified: &str) -> Option<&ClassCoverage> {
        self.locate_class(qualified)
            .map(|(pi, fi, ci)| &self.package_coverages[pi].file_coverages[fi].class_coverages[ci])
    }

    /// Like [`find_file_coverage`](Self::find_file_coverage), but returns
    /// a node that remembers its package.
    pub fn find_file_node(&self, name: &str) -> Option<CoverageNode<'_>> {
        self.package_coverages.iter().find_map(|p| {
            p.find_file_coverage(name).map(|file| CoverageNode::File {
                package: p.name(),
                file,
            })
        })
    }

    /// Like [`find_class_coverage`](Self::find_class_coverage), but returns
    /// a node that remembers its package.
    pub fn find_class_node(&self, qualified: &str) -> Option<CoverageNode<'_>> {
        self.locate_class(qualified)
            .map(|path| self.node_at(NodePath::Class(path.0, path.1, path.2)))
    }

    /// Record the owning report on every node of the tree.
    pub fn set_owner(&mut self, owner: &Owner) {
        self.metrics.owner = Some(owner.clone());
        for package in &mut self.package_coverages {
            package.set_owner(owner);
        }
    }

    /// Make file names relative to `base` (usually the workspace path).
    /// Separators are normalised to `/` first, so Windows and Unix paths
    /// trim the same way.
    pub fn trim_paths(&mut self, base: &str) {
        let base = base.replace('\\', "/");
        let base = base.trim_end_matches('/');
        for package in &mut self.package_coverages {
            for file in &mut package.file_coverages {
                let name = file.metrics.name.replace('\\', "/");
                let trimmed = if base.is_empty() {
                    name.as_str()
                } else {
                    name.strip_prefix(base)
                        .filter(|rest| rest.starts_with('/'))
                        .map_or(name.as_str(), |rest| rest.trim_start_matches('/'))
                };
                file.metrics.name = trimmed.to_string();
            }
        }
    }

    /// The class lookup tries every package whose name is a dotted prefix
    /// of `qualified`, matching either the remainder or the full name.
    fn locate_class(&self, qualified: &str) -> Option<(usize, usize, usize)> {
        self.package_coverages.iter().enumerate().find_map(|(pi, p)| {
            let rest = qualified
                .strip_prefix(p.name())
                .and_then(|r| r.strip_prefix('.'))?;
            p.locate_class(rest)
                .or_else(|| p.locate_class(qualified))
                .map(|(fi, ci)| (pi, fi, ci))
        })
    }

    /// Path of the node in this tree equivalent to `node`, matched by name.
    pub fn locate(&self, node: &CoverageNode<'_>) -> Option<NodePath> {
        match node {
            CoverageNode::Project(_) => Some(NodePath::Project),
            CoverageNode::Package(p) => self
                .package_coverages
                .iter()
                .position(|x| x.name() == p.name())
                .map(NodePath::Package),
            CoverageNode::File { file, .. } => {
                self.package_coverages.iter().enumerate().find_map(|(pi, p)| {
                    p.file_coverages
                        .iter()
                        .position(|x| x.name() == file.name())
                        .map(|fi| NodePath::File(pi, fi))
                })
            }
            CoverageNode::Class { .. } => self
                .locate_class(&node.qualified_name())
                .map(|(pi, fi, ci)| NodePath::Class(pi, fi, ci)),
        }
    }

    /// Node at `path`. Paths come from [`locate`](Self::locate) on this same
    /// tree, and the tree's structure never changes, so indices are in
    /// bounds.
    pub(crate) fn node_at(&self, path: NodePath) -> CoverageNode<'_> {
        match path {
            NodePath::Project => CoverageNode::Project(self),
            NodePath::Package(pi) => CoverageNode::Package(&self.package_coverages[pi]),
            NodePath::File(pi, fi) => {
                let package = &self.package_coverages[pi];
                CoverageNode::File {
                    package: package.name(),
                    file: &package.file_coverages[fi],
                }
            }
            NodePath::Class(pi, fi, ci) => {
                let package = &self.package_coverages[pi];
                CoverageNode::Class {
                    package: package.name(),
                    class: &package.file_coverages[fi].class_coverages[ci],
                }
            }
        }
    }
}

impl Coverage for ProjectCoverage {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Index path of a node inside one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodePath {
    Project,
    Package(usize),
    File(usize, usize),
    Class(usize, usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Project,
    Package,
    File,
    Class,
}

/// Borrowed view of any node. Files and classes carry their package name so
/// classes can be addressed project-wide wherever the walk started.
#[derive(Debug, Clone, Copy)]
pub enum CoverageNode<'a> {
    Project(&'a ProjectCoverage),
    Package(&'a PackageCoverage),
    File {
        package: &'a str,
        file: &'a FileCoverage,
    },
    Class {
        package: &'a str,
        class: &'a ClassCoverage,
    },
}

impl<'a> CoverageNode<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            CoverageNode::Project(_) => NodeKind::Project,
            CoverageNode::Package(_) => NodeKind::Package,
            CoverageNode::File { .. } => NodeKind::File,
            CoverageNode::Class { .. } => NodeKind::Class,
        }
    }

    /// Name used to find this node from the project root: `<package>.<class>`
    /// for classes, the plain name otherwise.
    pub fn qualified_name(&self) -> String {
        match self {
            CoverageNode::Class { package, class } => format!("{}.{}", package, class.name()),
            other => other.name().to_string(),
        }
    }

    pub fn children(&self) -> Vec<CoverageNode<'a>> {
        match *self {
            CoverageNode::Project(p) => p
                .package_coverages
                .iter()
                .map(CoverageNode::Package)
                .collect(),
            CoverageNode::Package(p) => p
                .file_coverages
                .iter()
                .map(|file| CoverageNode::File {
                    package: p.name(),
                    file,
                })
                .collect(),
            CoverageNode::File { package, file } => file
                .class_coverages
                .iter()
                .map(|class| CoverageNode::Class { package, class })
                .collect(),
            CoverageNode::Class { .. } => Vec::new(),
        }
    }
}

impl Coverage for CoverageNode<'_> {
    fn metrics(&self) -> &Metrics {
        match self {
            CoverageNode::Project(p) => &p.metrics,
            CoverageNode::Package(p) => &p.metrics,
            CoverageNode::File { file, .. } => &file.metrics,
            CoverageNode::Class { class, .. } => &class.metrics,
        }
    }
}

impl<'a> From<&'a ProjectCoverage> for CoverageNode<'a> {
    fn from(p: &'a ProjectCoverage) -> Self {
        CoverageNode::Project(p)
    }
}

impl<'a> From<&'a PackageCoverage> for CoverageNode<'a> {
    fn from(p: &'a PackageCoverage) -> Self {
        CoverageNode::Package(p)
    }
}
