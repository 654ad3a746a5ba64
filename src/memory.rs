//! In-process triple store. Data outlives repository handles, so a fresh
//! cache over the same store behaves like a restarted service over the same
//! server.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::backend::{
    CreateOutcome, IsolationLevel, Repository, RepositoryTemplate, Transaction, TripleStore,
};
use crate::error::ReplicaError;
use crate::rdf::{Pattern, Quad};

#[derive(Clone, Default)]
pub struct MemoryTripleStore {
    state: Arc<StoreState>,
}

#[derive(Default)]
struct StoreState {
    repositories: Mutex<BTreeMap<String, Arc<RepositoryData>>>,
    create_calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    listing_unavailable: AtomicBool,
    opened: AtomicUsize,
    shut_down: AtomicUsize,
}

#[derive(Default)]
struct RepositoryData {
    quads: Mutex<BTreeSet<Quad>>,
    writer_busy: Mutex<bool>,
    writer_free: Condvar,
}

impl RepositoryData {
    fn lock_writer(&self) -> WriterGate<'_> {
        let mut busy = lock(&self.writer_busy);
        while *busy {
            busy = self
                .writer_free
                .wait(busy)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *busy = true;
        WriterGate { data: self }
    }
}

struct WriterGate<'a> {
    data: &'a RepositoryData,
}

impl Drop for WriterGate<'_> {
    fn drop(&mut self) {
        *lock(&self.data.writer_busy) = false;
        self.data.writer_free.notify_one();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTripleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times creation was attempted for `name`.
    pub fn create_calls(&self, name: &str) -> usize {
        lock(&self.state.create_calls)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn opened_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn shut_down_count(&self) -> usize {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    /// Repository handles currently open against this store.
    pub fn open_handles(&self) -> usize {
        self.opened_count() - self.shut_down_count()
    }

    pub fn set_failing(&self, name: &str, failing: bool) {
        let mut set = lock(&self.state.failing);
        if failing {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }

    pub fn set_listing_unavailable(&self, unavailable: bool) {
        self.state
            .listing_unavailable
            .store(unavailable, Ordering::SeqCst);
    }

    pub fn quads(&self, name: &str) -> Vec<Quad> {
        lock(&self.state.repositories)
            .get(name)
            .map(|data| lock(&data.quads).iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count_matching(&self, name: &str, pattern: &Pattern) -> usize {
        self.quads(name)
            .iter()
            .filter(|quad| pattern.matches(quad))
            .count()
    }
}

impl TripleStore for MemoryTripleStore {
    fn create_repository(
        &self,
        template: &RepositoryTemplate,
    ) -> Result<CreateOutcome, ReplicaError> {
        *lock(&self.state.create_calls)
            .entry(template.name.clone())
            .or_default() += 1;
        let mut repositories = lock(&self.state.repositories);
        if repositories.contains_key(&template.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        repositories.insert(template.name.clone(), Arc::default());
        Ok(CreateOutcome::Created)
    }

    fn repository_names(&self) -> Result<BTreeSet<String>, ReplicaError> {
        if self.state.listing_unavailable.load(Ordering::SeqCst) {
            return Err(ReplicaError::TripleStoreStatus {
                status: 503,
                message: "repository listing unavailable".to_string(),
            });
        }
        Ok(lock(&self.state.repositories).keys().cloned().collect())
    }

    fn open(&self, name: &str) -> Result<Arc<dyn Repository>, ReplicaError> {
        let data = lock(&self.state.repositories)
            .get(name)
            .cloned()
            .ok_or_else(|| ReplicaError::TripleStoreStatus {
                status: 404,
                message: format!("unknown repository {name}"),
            })?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryRepository {
            name: name.to_string(),
            data,
            store: self.state.clone(),
            open: AtomicBool::new(true),
        }))
    }
}

pub struct MemoryRepository {
    name: String,
    data: Arc<RepositoryData>,
    store: Arc<StoreState>,
    open: AtomicBool,
}

impl MemoryRepository {
    fn check(&self) -> Result<(), ReplicaError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ReplicaError::RepositoryClosed(self.name.clone()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), ReplicaError> {
        self.check()?;
        if lock(&self.store.failing).contains(&self.name) {
            return Err(ReplicaError::TripleStoreHttp(format!(
                "write to {} refused",
                self.name
            )));
        }
        Ok(())
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn statements(&self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError> {
        self.check()?;
        Ok(lock(&self.data.quads)
            .iter()
            .filter(|quad| pattern.matches(quad))
            .cloned()
            .collect())
    }

    fn add(&self, quads: &[Quad]) -> Result<(), ReplicaError> {
        self.check_writable()?;
        let _gate = self.data.lock_writer();
        lock(&self.data.quads).extend(quads.iter().cloned());
        Ok(())
    }

    fn begin(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction + '_>, ReplicaError> {
        self.check()?;
        let gate = self.data.lock_writer();
        Ok(Box::new(MemoryTransaction {
            repository: self,
            pending: Vec::new(),
            _gate: gate,
        }))
    }

    fn shut_down(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.store.shut_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

enum Pending {
    Remove(Pattern),
    Add(Vec<Quad>),
}

impl Pending {
    fn apply(&self, quads: &mut BTreeSet<Quad>, filter: Option<&Pattern>) {
        match self {
            Pending::Remove(pattern) => quads.retain(|quad| !pattern.matches(quad)),
            Pending::Add(added) => quads.extend(
                added
                    .iter()
                    .filter(|quad| filter.is_none_or(|pattern| pattern.matches(quad)))
                    .cloned(),
            ),
        }
    }
}

/// Buffers changes until commit; the writer gate makes it serializable.
struct MemoryTransaction<'a> {
    repository: &'a MemoryRepository,
    pending: Vec<Pending>,
    _gate: WriterGate<'a>,
}

impl Transaction for MemoryTransaction<'_> {
    fn statements(&mut self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError> {
        self.repository.check()?;
        let mut view: BTreeSet<Quad> = lock(&self.repository.data.quads)
            .iter()
            .filter(|quad| pattern.matches(quad))
            .cloned()
            .collect();
        for change in &self.pending {
            change.apply(&mut view, Some(pattern));
        }
        Ok(view.into_iter().collect())
    }

    fn remove(&mut self, pattern: &Pattern) -> Result<(), ReplicaError> {
        self.repository.check()?;
        self.pending.push(Pending::Remove(pattern.clone()));
        Ok(())
    }

    fn add(&mut self, quads: &[Quad]) -> Result<(), ReplicaError> {
        self.repository.check()?;
        self.pending.push(Pending::Add(quads.to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), ReplicaError> {
        self.repository.check_writable()?;
        let mut quads = lock(&self.repository.data.quads);
        for change in &self.pending {
            change.apply(&mut quads, None);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), ReplicaError> {
        Ok(())
    }
}
