use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::status::LoadingState;

#[derive(Debug, Error, Diagnostic)]
pub enum ReplicaError {
    #[error("missing config file at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown endpoint type: {0}")]
    #[diagnostic(help("supported endpoint types are `rdf4j` and `memory`"))]
    UnknownEndpointType(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("registry response is missing or has an invalid {0} header")]
    RegistryHeader(String),

    #[error("registry is not ready (status {0})")]
    RegistryNotReady(String),

    #[error("I/O error while reading the registry stream: {0}")]
    StreamIo(String),

    #[error("registry failed to deliver the record at counter {counter}: {message}")]
    StreamFrame { counter: i64, message: String },

    #[error("received counter {received} lower than the last committed counter {last}")]
    #[diagnostic(help("the registry or the network returned records out of order"))]
    CounterRegression { last: i64, received: i64 },

    #[error("triple store request failed: {0}")]
    TripleStoreHttp(String),

    #[error("triple store returned status {status}: {message}")]
    TripleStoreStatus { status: u16, message: String },

    #[error("repository {0} has been shut down")]
    RepositoryClosed(String),

    #[error("cannot transition from {from} to {to}")]
    InvalidTransition { from: LoadingState, to: LoadingState },

    #[error("cannot move the load counter from {current} back to {requested}")]
    CounterDecrease { current: i64, requested: i64 },

    #[error("loading status is already initialized")]
    AlreadyInitialized,

    #[error("loading status is not initialized")]
    NotInitialized,

    #[error("persisted loading status is unreadable: {0}")]
    CorruptState(String),

    #[error("malformed nanopublication: {0}")]
    MalformedRecord(String),

    #[error("invalid artifact code: {0}")]
    InvalidArtifactCode(String),

    #[error("failed to write {uri} into repository {repository}: {message}")]
    FanOut {
        uri: String,
        repository: String,
        message: String,
        transient: bool,
    },

    #[error("shutdown requested")]
    Shutdown,

    #[error("{operation} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },
}

impl ReplicaError {
    /// Failures that a later attempt may get past without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            ReplicaError::RegistryHttp(_)
            | ReplicaError::RegistryStatus { .. }
            | ReplicaError::RegistryHeader(_)
            | ReplicaError::RegistryNotReady(_)
            | ReplicaError::StreamIo(_)
            | ReplicaError::TripleStoreHttp(_)
            | ReplicaError::TripleStoreStatus { .. }
            | ReplicaError::RepositoryClosed(_)
            | ReplicaError::RetriesExhausted { .. } => true,
            ReplicaError::FanOut { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Misuse of the loading status, which no retry can fix.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ReplicaError::InvalidTransition { .. }
                | ReplicaError::CounterDecrease { .. }
                | ReplicaError::AlreadyInitialized
                | ReplicaError::NotInitialized
        )
    }
}
