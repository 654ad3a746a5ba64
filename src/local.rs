use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use serde::Serialize;

use crate::error::ReplicaError;
use crate::loader::{LoadOutcome, Loader};
use crate::nanopub::{Nanopub, RecordDocument};
use crate::registry::RegistryClient;
use crate::scheduler::ShutdownToken;

pub const URIS_FILE: &str = "nanopub-uris.txt";
pub const RECORDS_FILE: &str = "nanopubs.jsonl.gz";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalReport {
    pub loaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl LocalReport {
    fn record(&mut self, outcome: Result<LoadOutcome, ReplicaError>, source: &str) {
        match outcome {
            Ok(LoadOutcome::Loaded) => self.loaded += 1,
            Ok(LoadOutcome::AlreadyLoaded | LoadOutcome::Rejected) => self.skipped += 1,
            Err(err) => {
                tracing::warn!(source, error = %err, "local record not loaded");
                self.failed += 1;
            }
        }
    }
}

/// Seeds the repositories from files in the load directory before streaming.
pub struct LocalBootstrap {
    dir: Utf8PathBuf,
    init_wait: Duration,
    log_every: u64,
}

impl LocalBootstrap {
    pub fn new(dir: impl Into<Utf8PathBuf>, init_wait: Duration, log_every: u64) -> Self {
        Self {
            dir: dir.into(),
            init_wait,
            log_every,
        }
    }

    pub fn uris_path(&self) -> Utf8PathBuf {
        self.dir.join(URIS_FILE)
    }

    pub fn records_path(&self) -> Utf8PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    pub fn has_files(&self) -> bool {
        self.uris_path().exists() || self.records_path().exists()
    }

    pub fn run<R: RegistryClient>(
        &self,
        loader: &Loader,
        registry: &R,
        shutdown: &ShutdownToken,
    ) -> Result<LocalReport, ReplicaError> {
        let mut report = LocalReport::default();
        if !self.has_files() {
            tracing::info!(dir = %self.dir, "no local nanopub files found");
            return Ok(report);
        }
        if !self.init_wait.is_zero() {
            tracing::info!(seconds = self.init_wait.as_secs(), "waiting for the triple store");
            if shutdown.wait_timeout(self.init_wait) {
                return Err(ReplicaError::Shutdown);
            }
        }

        let uris = self.uris_path();
        if uris.exists() {
            for uri in read_uri_list(&uris)? {
                if shutdown.is_raised() {
                    return Err(ReplicaError::Shutdown);
                }
                let outcome = registry
                    .fetch_record(&uri)
                    .and_then(Nanopub::from_document)
                    .and_then(|nanopub| loader.load(&nanopub));
                report.record(outcome, &uri);
                self.progress(&report);
            }
        } else {
            tracing::info!(path = %uris, "no local nanopub URI file found");
        }

        let records = self.records_path();
        if records.exists() {
            for document in read_records(&records)? {
                if shutdown.is_raised() {
                    return Err(ReplicaError::Shutdown);
                }
                let outcome = document
                    .and_then(Nanopub::from_document)
                    .and_then(|nanopub| loader.load(&nanopub));
                report.record(outcome, records.as_str());
                self.progress(&report);
            }
        } else {
            tracing::info!(path = %records, "no local nanopub file found");
        }

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            failed = report.failed,
            "local bootstrap finished"
        );
        Ok(report)
    }

    fn progress(&self, report: &LocalReport) {
        let seen = report.loaded + report.skipped + report.failed;
        if self.log_every > 0 && seen % self.log_every == 0 {
            tracing::info!(seen, "local bootstrap progress");
        }
    }
}

/// Non-empty, trimmed lines of a URI list.
pub fn read_uri_list(path: &Utf8Path) -> Result<Vec<String>, ReplicaError> {
    let file =
        File::open(path).map_err(|err| ReplicaError::Filesystem(format!("open {path}: {err}")))?;
    let mut uris = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| ReplicaError::Filesystem(format!("read {path}: {err}")))?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            uris.push(line.to_string());
        }
    }
    Ok(uris)
}

/// Records from a gzip-compressed, newline-delimited JSON file, decoded
/// lazily. A line that does not decode is reported and the rest still load.
pub fn read_records(
    path: &Utf8Path,
) -> Result<impl Iterator<Item = Result<RecordDocument, ReplicaError>>, ReplicaError> {
    let file =
        File::open(path).map_err(|err| ReplicaError::Filesystem(format!("open {path}: {err}")))?;
    let reader = BufReader::new(GzDecoder::new(file));
    let path = path.to_owned();
    Ok(reader.lines().filter_map(move |line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(
            serde_json::from_str::<RecordDocument>(&line)
                .map_err(|err| ReplicaError::MalformedRecord(format!("{path}: {err}"))),
        ),
        Err(err) => Some(Err(ReplicaError::Filesystem(format!("read {path}: {err}")))),
    }))
}
