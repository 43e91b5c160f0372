//! Report cache: parsed coverage trees keyed by report handle, on a moka
//! `sync::Cache`.
//!
//! * At most one load runs per key. Concurrent callers for the same key block
//!   on that load and share its result; other keys load in parallel.
//! * Entries expire when not read for a while (an hour by default).
//! * Keys are held weakly. Once every `Arc<ReportHandle>` for an entry is
//!   gone the entry counts as absent, and the next load or [`ReportCache::purge`]
//!   evicts it along with anything expired.
//! * Failed loads are never cached. Every waiter gets the same error and the
//!   next call tries again.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, info, warn};

use crate::error::{ClovrError, Result};
use crate::history::BuildId;
use crate::identity::ReportIdentity;
use crate::model::{Owner, ProjectCoverage};
use crate::parsers::clover::CloverXmlLoader;
use crate::target::CoverageTarget;

pub const DEFAULT_EXPIRE_AFTER_ACCESS: Duration = Duration::from_secs(60 * 60);

/// Everything needed to find and load one published report.
#[derive(Debug, Clone)]
pub struct ReportHandle {
    pub build: BuildId,
    pub identity: ReportIdentity,
    /// Prefix trimmed from file names in the report.
    pub workspace_path: String,
    /// Archived report file.
    pub report_path: PathBuf,
    pub healthy_target: Option<CoverageTarget>,
    pub unhealthy_target: Option<CoverageTarget>,
}

impl ReportHandle {
    pub fn key(&self) -> ReportKey {
        ReportKey {
            build: self.build,
            workspace_path: self.workspace_path.clone(),
            identity: self.identity.clone(),
            healthy_target: self.healthy_target,
            unhealthy_target: self.unhealthy_target,
        }
    }

    pub fn owner(&self) -> Owner {
        Owner {
            build: self.build,
            identity: self.identity.clone(),
        }
    }
}

impl PartialEq for ReportHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ReportHandle {}

impl std::hash::Hash for ReportHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Cache key. Two handles share an entry iff every field matches. The build
/// is part of the key so successive builds never share a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub build: BuildId,
    pub workspace_path: String,
    pub identity: ReportIdentity,
    pub healthy_target: Option<CoverageTarget>,
    pub unhealthy_target: Option<CoverageTarget>,
}

/// Turns a handle into a coverage tree. Called at most once per cold key,
/// from whichever thread asked first.
pub trait ReportLoader: Send + Sync {
    fn load(&self, handle: &ReportHandle) -> Result<ProjectCoverage>;
}

impl<F> ReportLoader for F
where
    F: Fn(&ReportHandle) -> Result<ProjectCoverage> + Send + Sync,
{
    fn load(&self, handle: &ReportHandle) -> Result<ProjectCoverage> {
        self(handle)
    }
}

#[derive(Clone)]
struct CachedTree {
    tree: Arc<ProjectCoverage>,
    handle: Weak<ReportHandle>,
}

impl CachedTree {
    fn new(tree: Arc<ProjectCoverage>, handle: &Arc<ReportHandle>) -> Self {
        Self {
            tree,
            handle: Arc::downgrade(handle),
        }
    }

    fn is_live(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

pub struct ReportCache {
    entries: Cache<ReportKey, CachedTree>,
    loader: Arc<dyn ReportLoader>,
    expire_after_access: Duration,
}

impl ReportCache {
    pub fn new(loader: Arc<dyn ReportLoader>) -> Self {
        Self::with_expiry(loader, DEFAULT_EXPIRE_AFTER_ACCESS)
    }

    pub fn with_expiry(loader: Arc<dyn ReportLoader>, expire_after_access: Duration) -> Self {
        let entries = Cache::builder()
            .time_to_idle(expire_after_access)
            .support_invalidation_closures()
            .build();
        Self {
            entries,
            loader,
            expire_after_access,
        }
    }

    pub fn expire_after_access(&self) -> Duration {
        self.expire_after_access
    }

    /// The tree for `handle`, loading it on a miss.
    ///
    /// Blocks while another caller is loading the same key and returns that
    /// caller's result. Load failures come back as
    /// [`ClovrError::LoadFailed`], the same shared error for every waiter.
    pub fn get(&self, handle: &Arc<ReportHandle>) -> Result<Arc<ProjectCoverage>> {
        let key = handle.key();
        match self.entries.get(&key) {
            Some(cached) if cached.is_live() => {
                debug!(build = %key.build, identity = %key.identity, "report cache hit");
                return Ok(cached.tree);
            }
            Some(_) => {
                debug!(build = %key.build, identity = %key.identity, "report cache entry orphaned");
                self.entries.invalidate(&key);
            }
            None => {}
        }

        let build = key.build;
        let identity = key.identity.clone();
        let cached = self
            .entries
            .try_get_with(key, || {
                info!(
                    %build,
                    %identity,
                    path = %handle.report_path.display(),
                    "loading coverage report"
                );
                self.loader
                    .load(handle)
                    .map(|tree| CachedTree::new(Arc::new(tree), handle))
            })
            .map_err(|e| {
                warn!(%build, %identity, error = %e, "coverage report failed to load");
                ClovrError::LoadFailed(e)
            })?;
        self.sweep();
        Ok(cached.tree)
    }

    /// Pre-seed the cache with a tree that is already at hand. The first
    /// `get` for `handle` then skips the loader.
    pub fn put(&self, handle: &Arc<ReportHandle>, tree: ProjectCoverage) -> Arc<ProjectCoverage> {
        let tree = Arc::new(tree);
        self.entries
            .insert(handle.key(), CachedTree::new(Arc::clone(&tree), handle));
        self.sweep();
        tree
    }

    /// True when a `get` for `handle` would be served without loading.
    pub fn contains(&self, handle: &ReportHandle) -> bool {
        self.entries
            .get(&handle.key())
            .is_some_and(|cached| cached.is_live())
    }

    /// Evict everything now. Loads already in flight still deliver to their
    /// waiters.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
        debug!("report cache invalidated");
    }

    /// Drop entries that expired or whose handle is gone. Returns how many
    /// were removed.
    pub fn purge(&self) -> usize {
        self.entries.run_pending_tasks();
        let before = self.entries.entry_count();
        self.sweep();
        let purged = before.saturating_sub(self.entries.entry_count()) as usize;
        if purged > 0 {
            debug!(purged, "purged report cache entries");
        }
        purged
    }

    /// Evict orphaned entries and run moka's pending maintenance, which also
    /// drops expired ones.
    fn sweep(&self) {
        if let Err(e) = self
            .entries
            .invalidate_entries_if(|_, cached| !cached.is_live())
        {
            warn!(error = %e, "could not register orphan sweep");
        }
        self.entries.run_pending_tasks();
    }

    /// Number of resident entries after pending maintenance.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL: OnceLock<Arc<ReportCache>> = OnceLock::new();

/// The process-wide cache, backed by the Clover XML loader. The first call
/// fixes the expiry window.
pub fn global_with_expiry(expire_after_access: Duration) -> Arc<ReportCache> {
    Arc::clone(GLOBAL.get_or_init(|| {
        Arc::new(ReportCache::with_expiry(
            Arc::new(CloverXmlLoader),
            expire_after_access,
        ))
    }))
}

pub fn global() -> Arc<ReportCache> {
    global_with_expiry(DEFAULT_EXPIRE_AFTER_ACCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(build: u64) -> Arc<ReportHandle> {
        Arc::new(ReportHandle {
            build: BuildId(build),
            identity: ReportIdentity::legacy(),
            workspace_path: "/ws".to_string(),
            report_path: PathBuf::from("clover.xml"),
            healthy_target: None,
            unhealthy_target: None,
        })
    }

    fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn ReportLoader> {
        Arc::new(move |h: &ReportHandle| -> Result<ProjectCoverage> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProjectCoverage::new(format!("build-{}", h.build.0)))
        })
    }

    #[test]
    fn test_hit_after_first_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ReportCache::new(counting(calls.clone()));
        let h = handle(1);

        let a = cache.get(&h).unwrap();
        let b = cache.get(&h).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&h));
    }

    #[test]
    fn test_equal_handles_share_an_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ReportCache::new(counting(calls.clone()));
        let h1 = handle(1);
        let h2 = Arc::new((*h1).clone());
        assert_eq!(*h1, *h2);

        cache.get(&h1).unwrap();
        cache.get(&h2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut other = (*h1).clone();
        other.healthy_target = Some(CoverageTarget::default_healthy());
        cache.get(&Arc::new(other)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_put_skips_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ReportCache::new(counting(calls.clone()));
        let h = handle(3);
        cache.put(&h, ProjectCoverage::new("seeded"));
        assert_eq!(cache.get(&h).unwrap().metrics.name, "seeded");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_expiry_always_reloads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ReportCache::with_expiry(counting(calls.clone()), Duration::ZERO);
        let h = handle(1);
        cache.get(&h).unwrap();
        cache.get(&h).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failure_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader: Arc<dyn ReportLoader> = Arc::new(move |_: &ReportHandle| -> Result<ProjectCoverage> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClovrError::ReportNotFound("clover.xml".to_string()))
            } else {
                Ok(ProjectCoverage::new("recovered"))
            }
        });
        let cache = ReportCache::new(loader);
        let h = handle(1);

        let err = cache.get(&h).unwrap_err();
        match err {
            ClovrError::LoadFailed(inner) => {
                assert!(matches!(*inner, ClovrError::ReportNotFound(_)))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(cache.is_empty());
        assert_eq!(cache.get(&h).unwrap().metrics.name, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_handle_is_purged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = ReportCache::new(counting(calls.clone()));
        let h = handle(1);
        cache.get(&h).unwrap();
        assert_eq!(cache.purge(), 0);

        let probe = (*h).clone();
        drop(h);
        assert!(!cache.contains(&probe));
        assert_eq!(cache.purge(), 1);
        assert!(cache.is_empty());
    }
}
