use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use crate::backend::{
    CreateOutcome, IsolationLevel, RepositoryHandle, RepositoryTemplate, TripleStore,
    in_transaction,
};
use crate::coverage::CoverageIndex;
use crate::error::ReplicaError;
use crate::nanopub::Checksum;
use crate::rdf::{Pattern, Quad, Term};
use crate::vocab;

pub const ADMIN: &str = "admin";
pub const EMPTY: &str = "empty";
pub const FULL: &str = "full";
pub const META: &str = "meta";
pub const TYPE_PREFIX: &str = "type_";
pub const PUBKEY_PREFIX: &str = "pubkey_";

pub const DEFAULT_CAPACITY: usize = 100;

/// Open repository handles, bounded and evicted least-recently-used first.
///
/// `admin` is opened on construction and kept outside the LRU, so the bound
/// applies to every other repository.
pub struct RepositoryCache {
    store: Arc<dyn TripleStore>,
    admin: RepositoryHandle,
    coverage: CoverageIndex,
    capacity: NonZeroUsize,
    open: Mutex<LruCache<String, RepositoryHandle>>,
}

impl RepositoryCache {
    pub fn new(store: Arc<dyn TripleStore>, capacity: usize) -> Result<Self, ReplicaError> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let outcome = store.create_repository(&RepositoryTemplate::for_name(ADMIN))?;
        let admin = store.open(ADMIN)?;
        let coverage = CoverageIndex::new(admin.clone());
        let cache = Self {
            store,
            admin,
            coverage,
            capacity,
            open: Mutex::new(LruCache::unbounded()),
        };
        if outcome == CreateOutcome::Created || !is_bootstrapped(&cache.admin)? {
            cache.bootstrap(&cache.admin)?;
        }
        cache.get(EMPTY)?;
        Ok(cache)
    }

    pub fn admin(&self) -> &RepositoryHandle {
        &self.admin
    }

    pub fn coverage(&self) -> &CoverageIndex {
        &self.coverage
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, RepositoryHandle>> {
        self.open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Result<RepositoryHandle, ReplicaError> {
        if name == ADMIN {
            return Ok(self.admin.clone());
        }
        let mut open = self.lock();
        if let Some(handle) = open.get(name) {
            return Ok(handle.clone());
        }

        let outcome = self
            .store
            .create_repository(&RepositoryTemplate::for_name(name))?;
        let handle = self.store.open(name)?;
        // a repository whose bootstrap failed after creation still lacks its init id
        if name != EMPTY {
            let prepared = match outcome {
                CreateOutcome::Created => Ok(false),
                CreateOutcome::AlreadyExists => is_bootstrapped(&handle),
            }
            .and_then(|done| if done { Ok(()) } else { self.bootstrap(&handle) });
            if let Err(err) = prepared {
                handle.shut_down();
                return Err(err);
            }
        }

        while open.len() >= self.capacity.get() {
            let Some((evicted, old)) = open.pop_lru() else {
                break;
            };
            old.shut_down();
            tracing::debug!(repository = %evicted, "evicted repository handle");
        }
        open.put(name.to_string(), handle.clone());
        tracing::debug!(repository = name, ?outcome, "opened repository");
        Ok(handle)
    }

    /// Handle for the query layer; failures are logged and reported as absent.
    pub fn connection(&self, name: &str) -> Option<RepositoryHandle> {
        match self.get(name) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(repository = name, error = %err, "repository unavailable");
                None
            }
        }
    }

    /// Every repository known to the backend, or `None` when the listing
    /// cannot be obtained.
    pub fn names(&self) -> Option<BTreeSet<String>> {
        match self.store.repository_names() {
            Ok(names) => Some(names),
            Err(err) => {
                tracing::warn!(error = %err, "could not list repositories");
                None
            }
        }
    }

    /// Cached names, most recently used first. `admin` is not included.
    pub fn cached(&self) -> Vec<String> {
        self.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn shutdown(&self) {
        let mut open = self.lock();
        while let Some((_, handle)) = open.pop_lru() {
            handle.shut_down();
        }
        self.admin.shut_down();
    }

    fn bootstrap(&self, handle: &RepositoryHandle) -> Result<(), ReplicaError> {
        let name = handle.name().to_string();
        let admin = vocab::admin_graph();
        let this = vocab::this_repo();
        let stmt = |predicate: Term, object: Term| {
            Quad::new(this.clone(), predicate, object, admin.clone())
        };

        let mut statements = vec![
            stmt(vocab::has_repo_init_id(), Term::long(rand::random::<i64>())),
            stmt(vocab::has_nanopub_count(), Term::long(0)),
            stmt(
                vocab::has_nanopub_checksum(),
                Term::literal(Checksum::initial().to_string()),
            ),
        ];
        if let Some(hash) = scoping_hash(&name) {
            if let Some(value) = self.coverage.resolve(hash)? {
                statements.push(stmt(vocab::has_coverage_item(), value));
            }
            statements.push(stmt(vocab::has_coverage_hash(), Term::literal(hash)));
            statements.push(stmt(
                vocab::has_coverage_filter(),
                Term::literal(format!("_{name}")),
            ));
        }

        in_transaction(handle.as_ref(), IsolationLevel::Serializable, |tx| {
            tx.add(&statements)
        })?;
        tracing::info!(repository = %name, "initialized repository");
        Ok(())
    }
}

fn is_bootstrapped(handle: &RepositoryHandle) -> Result<bool, ReplicaError> {
    handle.has_statement(
        &Pattern::new()
            .subject(vocab::this_repo())
            .predicate(vocab::has_repo_init_id())
            .graph(vocab::admin_graph()),
    )
}

/// The hash embedded in a `type_` or `pubkey_` repository name.
pub fn scoping_hash(name: &str) -> Option<&str> {
    name.strip_prefix(TYPE_PREFIX)
        .or_else(|| name.strip_prefix(PUBKEY_PREFIX))
}
