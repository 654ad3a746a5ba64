use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::backend::{IsolationLevel, RepositoryHandle, Transaction, in_transaction};
use crate::error::ReplicaError;
use crate::nanopub::{Checksum, Nanopub};
use crate::rdf::{Pattern, Quad, Term};
use crate::repository::{FULL, META, PUBKEY_PREFIX, RepositoryCache, TYPE_PREFIX};
use crate::vocab;

const ADD_CHUNK: usize = 1000;
const RETRY_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
    Rejected,
}

/// Routes accepted records into `full`, the matching `pubkey_` and `type_`
/// repositories, and finally `meta`, whose load number marks the record done.
pub struct Loader {
    cache: Arc<RepositoryCache>,
    fanout_attempts: u32,
}

impl Loader {
    pub fn new(cache: Arc<RepositoryCache>, fanout_attempts: u32) -> Self {
        Self {
            cache,
            fanout_attempts: fanout_attempts.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<RepositoryCache> {
        &self.cache
    }

    pub fn is_loaded(&self, uri: &Term) -> Result<bool, ReplicaError> {
        let meta = self.cache.get(META)?;
        meta.has_statement(&load_number_pattern(uri))
    }

    /// Names of the derived repositories the record belongs to, registering
    /// unseen scoping values in the coverage index.
    pub fn derived_targets(&self, nanopub: &Nanopub) -> Result<Vec<String>, ReplicaError> {
        let coverage = self.cache.coverage();
        let mut targets = Vec::new();
        if let Some(key) = nanopub.public_key() {
            let hash = coverage.register(&Term::literal(key))?;
            targets.push(format!("{PUBKEY_PREFIX}{hash}"));
        }
        for ty in nanopub.types() {
            let hash = coverage.register(&ty)?;
            targets.push(format!("{TYPE_PREFIX}{hash}"));
        }
        Ok(targets)
    }

    pub fn load(&self, nanopub: &Nanopub) -> Result<LoadOutcome, ReplicaError> {
        let uri = nanopub.uri().value().to_string();
        if self.is_loaded(nanopub.uri())? {
            tracing::debug!(uri = %uri, "already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        if let Some(reason) = nanopub.rejection_reason() {
            tracing::info!(uri = %uri, reason = %reason, "rejected record");
            let note = Quad::new(
                nanopub.uri().clone(),
                vocab::note(),
                Term::literal(reason),
                vocab::admin_graph(),
            );
            self.write_with_retries(META, &uri, |repo| repo.add(std::slice::from_ref(&note)))?;
            return Ok(LoadOutcome::Rejected);
        }

        let admin = nanopub.admin_statements();
        let mut statements = nanopub.quads().to_vec();
        statements.extend(admin.iter().cloned());

        self.write_with_retries(FULL, &uri, |repo| {
            write_record(repo, nanopub, &statements).map(|_| ())
        })?;
        for target in self.derived_targets(nanopub)? {
            self.write_with_retries(&target, &uri, |repo| {
                write_record(repo, nanopub, &statements).map(|_| ())
            })?;
        }
        self.write_with_retries(META, &uri, |repo| {
            write_record(repo, nanopub, &admin).map(|_| ())
        })?;
        tracing::debug!(uri = %uri, "loaded record");
        Ok(LoadOutcome::Loaded)
    }

    fn write_with_retries<F>(&self, name: &str, uri: &str, mut write: F) -> Result<(), ReplicaError>
    where
        F: FnMut(&RepositoryHandle) -> Result<(), ReplicaError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.cache.get(name).and_then(|repo| write(&repo));
            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.fanout_attempts => {
                    tracing::warn!(repository = name, uri, attempt, error = %err, "retrying write");
                    thread::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)));
                }
                Err(err) => {
                    return Err(ReplicaError::FanOut {
                        uri: uri.to_string(),
                        repository: name.to_string(),
                        message: err.to_string(),
                        transient: err.is_transient(),
                    });
                }
            }
        }
    }
}

fn load_number_pattern(uri: &Term) -> Pattern {
    Pattern::new()
        .subject(uri.clone())
        .predicate(vocab::has_load_number())
        .graph(vocab::admin_graph())
}

fn repo_pattern(predicate: Term) -> Pattern {
    Pattern::new()
        .subject(vocab::this_repo())
        .predicate(predicate)
        .graph(vocab::admin_graph())
}

fn read_value(tx: &mut dyn Transaction, predicate: Term) -> Result<Option<Term>, ReplicaError> {
    Ok(tx
        .statements(&repo_pattern(predicate))?
        .into_iter()
        .next()
        .map(|quad| quad.object))
}

/// Writes one record into one repository together with its load number and
/// the updated count and checksum. Returns `false` when the repository
/// already holds the record.
pub fn write_record(
    repo: &RepositoryHandle,
    nanopub: &Nanopub,
    statements: &[Quad],
) -> Result<bool, ReplicaError> {
    let code = nanopub
        .artifact_code()
        .ok_or_else(|| ReplicaError::InvalidArtifactCode(nanopub.uri().value().to_string()))?;
    in_transaction(repo.as_ref(), IsolationLevel::Serializable, |tx| {
        if !tx.statements(&load_number_pattern(nanopub.uri()))?.is_empty() {
            return Ok(false);
        }
        let count = match read_value(tx, vocab::has_nanopub_count())? {
            Some(term) => term.as_i64().ok_or_else(|| {
                ReplicaError::CorruptState(format!("{}: nanopub count {term}", repo.name()))
            })?,
            None => 0,
        };
        let checksum = match read_value(tx, vocab::has_nanopub_checksum())? {
            Some(term) => term.value().parse::<Checksum>()?,
            None => Checksum::initial(),
        };
        let count = count + 1;
        let checksum = checksum.update(code)?.to_string();

        tx.remove(&repo_pattern(vocab::has_nanopub_count()))?;
        tx.remove(&repo_pattern(vocab::has_nanopub_checksum()))?;
        let admin = vocab::admin_graph();
        let this = vocab::this_repo();
        let uri = nanopub.uri();
        tx.add(&[
            Quad::new(this.clone(), vocab::has_nanopub_count(), Term::long(count), admin.clone()),
            Quad::new(
                this,
                vocab::has_nanopub_checksum(),
                Term::literal(checksum.clone()),
                admin.clone(),
            ),
            Quad::new(uri.clone(), vocab::has_load_number(), Term::long(count), admin.clone()),
            Quad::new(
                uri.clone(),
                vocab::has_load_checksum(),
                Term::literal(checksum),
                admin.clone(),
            ),
            Quad::new(
                uri.clone(),
                vocab::has_load_timestamp(),
                Term::date_time(&Utc::now()),
                admin,
            ),
        ])?;
        for chunk in statements.chunks(ADD_CHUNK) {
            tx.add(chunk)?;
        }
        Ok(true)
    })
}
