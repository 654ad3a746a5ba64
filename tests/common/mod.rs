#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nanopub_replica::backend::TripleStore;
use nanopub_replica::config::{Config, ConfigLoader, EndpointType, ResolvedConfig};
use nanopub_replica::error::ReplicaError;
use nanopub_replica::ingest::IngestSettings;
use nanopub_replica::memory::MemoryTripleStore;
use nanopub_replica::nanopub::{ArtifactCode, Nanopub, RecordDocument};
use nanopub_replica::rdf::{Pattern, Quad, Term};
use nanopub_replica::registry::{FrameStream, RegistryClient, RegistryMetadata, StreamFrame};
use nanopub_replica::repository::RepositoryCache;
use nanopub_replica::vocab;

pub const TYPE_IRI: &str = "http://example.org/types/Claim";
pub const ASSERTED: &str = "http://example.org/p/asserts";

pub fn code_for(n: u64) -> ArtifactCode {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&n.to_le_bytes());
    hash[31] = 0x5a;
    ArtifactCode::from_hash(&hash)
}

pub fn uri_for(n: u64) -> String {
    format!("https://w3id.org/np/{}", code_for(n))
}

/// A well-formed signed record with one explicit type.
pub fn record(n: u64, key: &str) -> RecordDocument {
    record_with(n, Some(key), &[TYPE_IRI])
}

pub fn record_with(n: u64, key: Option<&str>, types: &[&str]) -> RecordDocument {
    record_at(&uri_for(n), n, key, types)
}

/// Like [`record_with`], under an arbitrary record URI.
pub fn record_at(uri: &str, n: u64, key: Option<&str>, types: &[&str]) -> RecordDocument {
    let uri = uri.to_string();
    let np = Term::iri(uri.clone());
    let head = Term::iri(format!("{uri}/Head"));
    let assertion = Term::iri(format!("{uri}/assertion"));
    let provenance = Term::iri(format!("{uri}/provenance"));
    let pubinfo = Term::iri(format!("{uri}/pubinfo"));
    let signature = Term::iri(format!("{uri}/sig"));

    let mut quads = vec![
        Quad::new(
            np.clone(),
            Term::iri(vocab::RDF_TYPE),
            Term::iri(vocab::NANOPUBLICATION),
            head.clone(),
        ),
        Quad::new(np.clone(), Term::iri(vocab::HAS_ASSERTION), assertion.clone(), head.clone()),
        Quad::new(np.clone(), Term::iri(vocab::HAS_PROVENANCE), provenance.clone(), head.clone()),
        Quad::new(np.clone(), Term::iri(vocab::HAS_PUBINFO), pubinfo.clone(), head),
        Quad::new(
            Term::iri(format!("http://example.org/thing/{n}")),
            Term::iri(ASSERTED),
            Term::literal(format!("value {n}")),
            assertion.clone(),
        ),
        Quad::new(
            assertion,
            Term::iri("http://www.w3.org/ns/prov#wasAttributedTo"),
            Term::iri("https://orcid.org/0000-0000-0000-0000"),
            provenance,
        ),
        Quad::new(
            np.clone(),
            Term::iri(vocab::DCT_CREATED),
            Term::typed("2024-05-01T10:00:00Z", vocab::XSD_DATE_TIME),
            pubinfo.clone(),
        ),
    ];
    for ty in types {
        quads.push(Quad::new(
            np.clone(),
            Term::iri(vocab::HAS_NANOPUB_TYPE),
            Term::iri(*ty),
            pubinfo.clone(),
        ));
    }
    if let Some(key) = key {
        quads.push(Quad::new(
            signature.clone(),
            Term::iri(vocab::HAS_SIGNATURE_TARGET),
            np,
            pubinfo.clone(),
        ));
        quads.push(Quad::new(
            signature,
            Term::iri(vocab::HAS_PUBLIC_KEY),
            Term::literal(key),
            pubinfo,
        ));
    }
    RecordDocument { uri, quads }
}

pub fn nanopub(n: u64, key: &str) -> Nanopub {
    Nanopub::from_document(record(n, key)).unwrap()
}

pub fn settings() -> IngestSettings {
    IngestSettings {
        log_every: 100,
        metadata_retries: 3,
        metadata_retry_delay: Duration::from_millis(1),
        batch_retry_delay: Duration::from_millis(1),
        batch_retry_max_delay: Duration::from_millis(5),
    }
}

pub fn resolved_config(load_dir: &str) -> ResolvedConfig {
    let mut config = ConfigLoader::resolve_config(Config {
        endpoint_type: Some("memory".to_string()),
        load_dir: Some(load_dir.to_string()),
        update_interval_seconds: Some(1),
        fanout_attempts: Some(1),
        ..Config::default()
    })
    .unwrap();
    assert_eq!(config.endpoint_type, EndpointType::Memory);
    config.ingest = settings();
    config
}

pub fn cache(store: &MemoryTripleStore, capacity: usize) -> Arc<RepositoryCache> {
    let store: Arc<dyn TripleStore> = Arc::new(store.clone());
    Arc::new(RepositoryCache::new(store, capacity).unwrap())
}

/// Number of records a repository has recorded as loaded.
pub fn loaded_count(store: &MemoryTripleStore, repository: &str) -> usize {
    store.count_matching(
        repository,
        &Pattern::new()
            .predicate(vocab::has_load_number())
            .graph(vocab::admin_graph()),
    )
}

pub fn repo_value(store: &MemoryTripleStore, repository: &str, predicate: Term) -> Option<Term> {
    store
        .quads(repository)
        .into_iter()
        .find(|quad| quad.subject == vocab::this_repo() && quad.predicate == predicate)
        .map(|quad| quad.object)
}

pub enum Scripted {
    Record(i64, RecordDocument),
    Failed(i64, String),
    /// A failed frame that is delivered once, then disappears.
    FailedOnce(i64, String),
    /// Breaks the stream once, then disappears.
    Interrupt,
}

/// Registry whose metadata and stream are set up by the test.
#[derive(Default)]
pub struct ScriptedRegistry {
    pub target: Mutex<i64>,
    pub status: Mutex<Option<String>>,
    pub metadata_failures: Mutex<u32>,
    pub frames: Mutex<Vec<Scripted>>,
    pub opened_after: Mutex<Vec<i64>>,
    pub records: Mutex<HashMap<String, RecordDocument>>,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        let registry = Self::default();
        *registry.target.lock().unwrap() = -1;
        registry
    }

    /// Appends records `from..to` at their own positions and moves the
    /// target to the last one.
    pub fn publish(&self, from: u64, to: u64, key: &str) {
        let mut frames = self.frames.lock().unwrap();
        let mut records = self.records.lock().unwrap();
        for n in from..to {
            let document = record(n, key);
            records.insert(document.uri.clone(), document.clone());
            frames.push(Scripted::Record(n as i64, document));
        }
        *self.target.lock().unwrap() = to as i64 - 1;
    }

    pub fn push(&self, frame: Scripted) {
        self.frames.lock().unwrap().push(frame);
    }

    pub fn set_target(&self, target: i64) {
        *self.target.lock().unwrap() = target;
    }
}

impl RegistryClient for ScriptedRegistry {
    fn fetch_metadata(&self) -> Result<RegistryMetadata, ReplicaError> {
        let mut failures = self.metadata_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(ReplicaError::RegistryHttp("connection refused".to_string()));
        }
        Ok(RegistryMetadata {
            status: self
                .status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "ready".to_string()),
            load_counter: *self.target.lock().unwrap(),
        })
    }

    fn open_stream(&self, after_counter: i64) -> Result<FrameStream, ReplicaError> {
        self.opened_after.lock().unwrap().push(after_counter);
        let mut frames = self.frames.lock().unwrap();
        let mut out = Vec::new();
        let mut consumed = None;
        for (index, frame) in frames.iter().enumerate() {
            match frame {
                Scripted::Record(counter, document) if *counter > after_counter => {
                    out.push(Ok(StreamFrame::Record {
                        counter: *counter,
                        document: document.clone(),
                    }));
                }
                Scripted::Failed(counter, message) if *counter > after_counter => {
                    out.push(Ok(StreamFrame::Failed {
                        counter: *counter,
                        message: message.clone(),
                    }));
                }
                Scripted::FailedOnce(counter, message) if *counter > after_counter => {
                    out.push(Ok(StreamFrame::Failed {
                        counter: *counter,
                        message: message.clone(),
                    }));
                    consumed = Some(index);
                    break;
                }
                Scripted::Interrupt => {
                    out.push(Err(ReplicaError::StreamIo("connection reset".to_string())));
                    consumed = Some(index);
                    break;
                }
                _ => {}
            }
        }
        if let Some(index) = consumed {
            frames.remove(index);
        }
        Ok(Box::new(out.into_iter()))
    }

    fn fetch_record(&self, uri: &str) -> Result<RecordDocument, ReplicaError> {
        self.records
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| ReplicaError::RegistryStatus {
                status: 404,
                message: format!("{uri} not found"),
            })
    }
}
