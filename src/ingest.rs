use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::error::ReplicaError;
use crate::loader::{LoadOutcome, Loader};
use crate::nanopub::Nanopub;
use crate::registry::{RegistryClient, StreamFrame};
use crate::scheduler::{Backoff, ShutdownToken};
use crate::status::{LoadingState, LoadingStatus, StatusController};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub log_every: u64,
    pub metadata_retries: u32,
    pub metadata_retry_delay: Duration,
    pub batch_retry_delay: Duration,
    pub batch_retry_max_delay: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            log_every: 50,
            metadata_retries: 10,
            metadata_retry_delay: Duration::from_millis(3000),
            batch_retry_delay: Duration::from_millis(5000),
            batch_retry_max_delay: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Initial,
    Updates,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub target: i64,
    pub counter: i64,
    pub processed: u64,
    pub loaded: u64,
    pub rejected: u64,
}

impl BatchReport {
    pub fn caught_up(&self) -> bool {
        self.counter >= self.target
    }
}

/// Pulls records from the registry after the committed counter and
/// checkpoints each one once the loader has applied it.
pub struct Ingestor<R: RegistryClient> {
    registry: Arc<R>,
    status: Arc<StatusController>,
    loader: Arc<Loader>,
    shutdown: ShutdownToken,
    settings: IngestSettings,
    polling: AtomicBool,
    last_target: AtomicI64,
}

struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<R: RegistryClient> Ingestor<R> {
    pub fn new(
        registry: Arc<R>,
        status: Arc<StatusController>,
        loader: Arc<Loader>,
        shutdown: ShutdownToken,
        settings: IngestSettings,
    ) -> Self {
        Self {
            registry,
            status,
            loader,
            shutdown,
            settings,
            polling: AtomicBool::new(false),
            last_target: AtomicI64::new(-1),
        }
    }

    fn current(&self) -> Result<LoadingStatus, ReplicaError> {
        self.status.get_state().ok_or(ReplicaError::NotInitialized)
    }

    /// Registry load counter, retried with a fixed delay.
    pub fn fetch_target(&self) -> Result<i64, ReplicaError> {
        let attempts = self.settings.metadata_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let result = self.registry.fetch_metadata().and_then(|metadata| {
                if metadata.is_serving() {
                    Ok(metadata.load_counter)
                } else {
                    Err(ReplicaError::RegistryNotReady(metadata.status))
                }
            });
            match result {
                Ok(target) => return Ok(target),
                Err(err) if err.is_transient() => {
                    tracing::warn!(attempt, attempts, error = %err, "registry metadata unavailable");
                    last_error = err.to_string();
                }
                Err(err) => return Err(err),
            }
            if attempt < attempts && self.shutdown.wait_timeout(self.settings.metadata_retry_delay)
            {
                return Err(ReplicaError::Shutdown);
            }
        }
        Err(ReplicaError::RetriesExhausted {
            operation: "fetching the registry load counter".to_string(),
            attempts,
            message: last_error,
        })
    }

    /// Registry counter seen by the most recent batch.
    pub fn last_target(&self) -> i64 {
        self.last_target.load(Ordering::SeqCst)
    }

    pub fn run_batch(&self, mode: Mode) -> Result<BatchReport, ReplicaError> {
        let target = self.fetch_target()?;
        self.last_target.store(target, Ordering::SeqCst);
        let mut report = BatchReport {
            target,
            counter: self.current()?.counter,
            ..BatchReport::default()
        };
        if report.caught_up() {
            self.status.set_ready()?;
            return Ok(report);
        }

        tracing::info!(after = report.counter, target, ?mode, "streaming records");
        for frame in self.registry.open_stream(report.counter)? {
            if self.shutdown.is_raised() {
                return Err(ReplicaError::Shutdown);
            }
            let (counter, document) = match frame? {
                StreamFrame::Record { counter, document } => (counter, document),
                StreamFrame::Failed { counter, message } => {
                    return Err(ReplicaError::StreamFrame { counter, message });
                }
            };
            if counter < report.counter {
                return Err(ReplicaError::CounterRegression {
                    last: report.counter,
                    received: counter,
                });
            }

            let nanopub = Nanopub::from_document(document)?;
            match self.loader.load(&nanopub)? {
                LoadOutcome::Loaded => report.loaded += 1,
                LoadOutcome::Rejected => report.rejected += 1,
                LoadOutcome::AlreadyLoaded => {}
            }
            match mode {
                Mode::Initial => self.status.set_loading_initial(counter)?,
                Mode::Updates => self.status.set_loading_updates(counter)?,
            };
            report.counter = counter;
            report.processed += 1;

            if self.settings.log_every > 0 && report.processed % self.settings.log_every == 0 {
                tracing::info!(counter, target, processed = report.processed, "loading progress");
            }
        }
        tracing::info!(
            counter = report.counter,
            target,
            processed = report.processed,
            loaded = report.loaded,
            rejected = report.rejected,
            "batch finished"
        );
        Ok(report)
    }

    /// Runs batches until the counter reaches the registry's target, then
    /// marks the service ready. A failed batch is retried after a backoff
    /// delay from the last checkpoint; only shutdown and misuse of the
    /// loading status end the catch-up early.
    pub fn catch_up(&self) -> Result<LoadingStatus, ReplicaError> {
        let status = self.current()?;
        if status.state == LoadingState::Launching {
            self.status.set_loading_initial(status.counter)?;
        }
        let mut backoff = Backoff::new(
            self.settings.batch_retry_delay.as_millis() as u64,
            self.settings.batch_retry_max_delay.as_millis() as u64,
        );
        loop {
            if self.shutdown.is_raised() {
                return Err(ReplicaError::Shutdown);
            }
            let before = self.current()?.counter;
            match self.run_batch(Mode::Initial) {
                Ok(report) if report.caught_up() || report.counter == before => {
                    if !report.caught_up() {
                        tracing::warn!(
                            counter = report.counter,
                            target = report.target,
                            "registry stream ended before its advertised counter"
                        );
                    }
                    let status = self.status.set_ready()?;
                    tracing::info!(counter = status.counter, "initial load finished");
                    return Ok(status);
                }
                Ok(_) => {
                    backoff.reset();
                    continue;
                }
                Err(ReplicaError::Shutdown) => return Err(ReplicaError::Shutdown),
                Err(err) if err.is_contract_violation() => {
                    tracing::error!(counter = before, error = %err, "initial load aborted");
                    return Err(err);
                }
                Err(err) if err.is_transient() => {
                    let counter = self.current()?.counter;
                    let target = self.last_target();
                    tracing::warn!(counter, target, error = %err, "batch failed, retrying");
                }
                Err(err) => {
                    let counter = self.current()?.counter;
                    tracing::error!(
                        counter,
                        target = self.last_target(),
                        error = %err,
                        "batch failed and needs attention, retrying from the last checkpoint"
                    );
                }
            }
            if self.shutdown.wait_timeout(backoff.next_delay()) {
                return Err(ReplicaError::Shutdown);
            }
        }
    }

    /// One steady-state poll: at most one batch, always finishing in `READY`.
    /// Returns `None` when a previous poll is still running.
    pub fn poll(&self) -> Result<Option<BatchReport>, ReplicaError> {
        if self.polling.swap(true, Ordering::SeqCst) {
            tracing::debug!("previous poll still running");
            return Ok(None);
        }
        let _guard = PollGuard(&self.polling);
        let result = self.run_batch(Mode::Updates);
        if let Err(err) = self.status.set_ready() {
            tracing::warn!(error = %err, "could not mark status ready");
        }
        match result {
            Ok(report) => Ok(Some(report)),
            Err(err) => {
                let counter = self.status.get_state().map(|status| status.counter);
                let target = self.last_target();
                tracing::error!(?counter, target, error = %err, "update batch aborted");
                Err(err)
            }
        }
    }
}
