use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, tick};
use serde::Serialize;

use crate::backend::{RepositoryHandle, TripleStore};
use crate::config::ResolvedConfig;
use crate::error::ReplicaError;
use crate::ingest::Ingestor;
use crate::loader::{LoadOutcome, Loader};
use crate::local::{LocalBootstrap, LocalReport};
use crate::metrics::{self, Gauges};
use crate::nanopub::{Nanopub, short_pubkey_name};
use crate::registry::RegistryClient;
use crate::repository::{PUBKEY_PREFIX, RepositoryCache, scoping_hash};
use crate::scheduler::ShutdownToken;
use crate::status::{LoadingState, LoadingStatus, StatusController};

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub status: Option<LoadingStatus>,
    pub gauges: Gauges,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReposResult {
    pub available: bool,
    pub repositories: Vec<RepoEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoEntry {
    pub name: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub items: Vec<LoadItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadItem {
    pub uri: String,
    pub outcome: Option<String>,
    pub error: Option<String>,
}

fn outcome_name(outcome: LoadOutcome) -> &'static str {
    match outcome {
        LoadOutcome::Loaded => "loaded",
        LoadOutcome::AlreadyLoaded => "already-loaded",
        LoadOutcome::Rejected => "rejected",
    }
}

/// The replication service: repository cache, loading status, loader and
/// the two ingestion threads.
pub struct App<R: RegistryClient> {
    config: ResolvedConfig,
    cache: Arc<RepositoryCache>,
    status: Arc<StatusController>,
    loader: Arc<Loader>,
    registry: Arc<R>,
    ingestor: Arc<Ingestor<R>>,
    shutdown: ShutdownToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: RegistryClient + 'static> App<R> {
    /// Opens the repositories and recovers the loading status. No thread is
    /// started.
    pub fn new(
        config: ResolvedConfig,
        store: Arc<dyn TripleStore>,
        registry: R,
    ) -> Result<Self, ReplicaError> {
        let cache = Arc::new(RepositoryCache::new(store, config.cache_capacity)?);
        let status = Arc::new(StatusController::new(cache.admin().clone()));
        status.initialize()?;

        let loader = Arc::new(Loader::new(cache.clone(), config.fanout_attempts));
        let registry = Arc::new(registry);
        let shutdown = ShutdownToken::new();
        let ingestor = Arc::new(Ingestor::new(
            registry.clone(),
            status.clone(),
            loader.clone(),
            shutdown.clone(),
            config.ingest.clone(),
        ));
        Ok(Self {
            config,
            cache,
            status,
            loader,
            registry,
            ingestor,
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn start(
        config: ResolvedConfig,
        store: Arc<dyn TripleStore>,
        registry: R,
    ) -> Result<Self, ReplicaError> {
        let app = Self::new(config, store, registry)?;
        app.launch()?;
        Ok(app)
    }

    /// Local bootstrap, then the initial-load and update threads.
    pub fn launch(&self) -> Result<(), ReplicaError> {
        self.bootstrap_local()?;
        self.spawn_workers();
        Ok(())
    }

    pub fn bootstrap_local(&self) -> Result<LocalReport, ReplicaError> {
        LocalBootstrap::new(
            self.config.load_dir.clone(),
            self.config.init_wait,
            self.config.ingest.log_every,
        )
        .run(&self.loader, self.registry.as_ref(), &self.shutdown)
    }

    fn spawn_workers(&self) {
        let (done_tx, done_rx) = bounded::<bool>(1);

        let ingestor = self.ingestor.clone();
        let status = self.status.clone();
        let initial = thread::spawn(move || {
            let resume = status.get_state().is_some_and(|current| {
                matches!(
                    current.state,
                    LoadingState::Launching | LoadingState::LoadingInitial
                )
            });
            let finished = if resume {
                match ingestor.catch_up() {
                    Ok(_) => true,
                    Err(ReplicaError::Shutdown) => false,
                    Err(err) => {
                        tracing::error!(error = %err, "initial load failed; updates stay disabled");
                        false
                    }
                }
            } else {
                tracing::info!("initial load already done");
                true
            };
            let _ = done_tx.send(finished);
        });

        let ingestor = self.ingestor.clone();
        let shutdown = self.shutdown.clone();
        let interval = self.config.update_interval;
        let updates = thread::spawn(move || {
            let finished = select! {
                recv(done_rx) -> msg => msg.unwrap_or(false),
                recv(shutdown.receiver()) -> _ => false,
            };
            if !finished {
                return;
            }
            tracing::info!(interval_secs = interval.as_secs(), "polling for updates");
            let ticker = tick(interval);
            loop {
                select! {
                    recv(shutdown.receiver()) -> _ => break,
                    recv(ticker) -> _ => {
                        if shutdown.is_raised() {
                            break;
                        }
                        if let Err(ReplicaError::Shutdown) = ingestor.poll() {
                            break;
                        }
                    }
                }
            }
        });

        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        workers.push(initial);
        workers.push(updates);
    }

    pub fn get_state(&self) -> Option<LoadingStatus> {
        self.status.get_state()
    }

    /// Handle for query execution against a named repository.
    pub fn connection(&self, name: &str) -> Option<RepositoryHandle> {
        self.cache.connection(name)
    }

    pub fn gauges(&self) -> Gauges {
        metrics::collect(&self.status, &self.cache)
    }

    pub fn ingestor(&self) -> &Arc<Ingestor<R>> {
        &self.ingestor
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> StatusResult {
        StatusResult {
            status: self.get_state(),
            gauges: self.gauges(),
        }
    }

    pub fn repos(&self) -> Result<ReposResult, ReplicaError> {
        let Some(names) = self.cache.names() else {
            return Ok(ReposResult {
                available: false,
                repositories: Vec::new(),
            });
        };
        let coverage = self.cache.coverage();
        let mut repositories = Vec::with_capacity(names.len());
        for name in names {
            let scope = match scoping_hash(&name) {
                Some(hash) => coverage.resolve(hash)?.map(|value| {
                    if name.starts_with(PUBKEY_PREFIX) {
                        short_pubkey_name(value.value())
                    } else {
                        value.value().to_string()
                    }
                }),
                None => None,
            };
            repositories.push(RepoEntry { name, scope });
        }
        Ok(ReposResult {
            available: true,
            repositories,
        })
    }

    /// Fetches the records from the registry and loads them one by one.
    pub fn load(&self, uris: &[String]) -> LoadResult {
        let items = uris
            .iter()
            .map(|uri| {
                let result = self
                    .registry
                    .fetch_record(uri)
                    .and_then(Nanopub::from_document)
                    .and_then(|nanopub| self.loader.load(&nanopub));
                match result {
                    Ok(outcome) => LoadItem {
                        uri: uri.clone(),
                        outcome: Some(outcome_name(outcome).to_string()),
                        error: None,
                    },
                    Err(err) => LoadItem {
                        uri: uri.clone(),
                        outcome: None,
                        error: Some(err.to_string()),
                    },
                }
            })
            .collect();
        LoadResult { items }
    }

    /// Blocks until shutdown is raised.
    pub fn wait(&self) {
        let _ = self.shutdown.receiver().recv();
    }

    /// Raises the shutdown token, lets in-flight writes finish, then closes
    /// every repository.
    pub fn shutdown(&self) {
        self.shutdown.raise();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("ingestion thread panicked");
            }
        }
        self.cache.shutdown();
        tracing::info!("shut down");
    }
}
