use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::backend::RepositoryHandle;
use crate::error::ReplicaError;
use crate::rdf::{Pattern, Quad, Term};
use crate::vocab;

/// Hash → scoping value table, persisted as `<npa:hash/H> npa:isHashOf value`
/// in the admin graph of the admin repository.
pub struct CoverageIndex {
    admin: RepositoryHandle,
    table: Mutex<Option<HashMap<String, Term>>>,
}

/// Lowercase hex SHA-256 of the value's lexical form.
pub fn coverage_hash(value: &Term) -> String {
    let digest = Sha256::digest(value.value().as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

impl CoverageIndex {
    pub fn new(admin: RepositoryHandle) -> Self {
        Self {
            admin,
            table: Mutex::new(None),
        }
    }

    fn loaded(&self) -> Result<MutexGuard<'_, Option<HashMap<String, Term>>>, ReplicaError> {
        let mut table = self
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if table.is_none() {
            let pattern = Pattern::new()
                .predicate(vocab::is_hash_of())
                .graph(vocab::admin_graph());
            let mut entries = HashMap::new();
            for quad in self.admin.statements(&pattern)? {
                let Some(hash) = quad
                    .subject
                    .as_iri()
                    .and_then(|iri| iri.strip_prefix(&format!("{}hash/", vocab::NPA)))
                else {
                    continue;
                };
                entries.insert(hash.to_string(), quad.object);
            }
            tracing::debug!(entries = entries.len(), "loaded coverage index");
            *table = Some(entries);
        }
        Ok(table)
    }

    pub fn resolve(&self, hash: &str) -> Result<Option<Term>, ReplicaError> {
        let table = self.loaded()?;
        Ok(table.as_ref().and_then(|entries| entries.get(hash).cloned()))
    }

    /// Persists the entry before it becomes visible in memory.
    pub fn register(&self, value: &Term) -> Result<String, ReplicaError> {
        let hash = coverage_hash(value);
        let mut table = self.loaded()?;
        if table
            .as_ref()
            .is_some_and(|entries| entries.contains_key(&hash))
        {
            return Ok(hash);
        }
        self.admin.add(&[Quad::new(
            vocab::hash_iri(&hash),
            vocab::is_hash_of(),
            value.clone(),
            vocab::admin_graph(),
        )])?;
        if let Some(entries) = table.as_mut() {
            entries.insert(hash.clone(), value.clone());
        }
        Ok(hash)
    }

    pub fn len(&self) -> Result<usize, ReplicaError> {
        Ok(self.loaded()?.as_ref().map_or(0, HashMap::len))
    }

    pub fn is_empty(&self) -> Result<bool, ReplicaError> {
        Ok(self.len()? == 0)
    }
}
