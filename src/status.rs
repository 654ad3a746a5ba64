use std::fmt;
use std::sync::{Mutex, RwLock};

use serde::Serialize;

use crate::backend::{IsolationLevel, RepositoryHandle, Transaction, in_transaction};
use crate::error::ReplicaError;
use crate::rdf::{Pattern, Quad, Term};
use crate::vocab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadingState {
    Launching,
    LoadingInitial,
    LoadingUpdates,
    Ready,
}

impl LoadingState {
    pub const ALL: [LoadingState; 4] = [
        LoadingState::Launching,
        LoadingState::LoadingInitial,
        LoadingState::LoadingUpdates,
        LoadingState::Ready,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingState::Launching => "LAUNCHING",
            LoadingState::LoadingInitial => "LOADING_INITIAL",
            LoadingState::LoadingUpdates => "LOADING_UPDATES",
            LoadingState::Ready => "READY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value.trim())
    }

    pub fn can_transition_to(&self, next: LoadingState) -> bool {
        use LoadingState::*;
        matches!(
            (self, next),
            (Launching, LoadingInitial)
                | (LoadingInitial, LoadingInitial)
                | (LoadingInitial, Ready)
                | (Ready, LoadingUpdates)
                | (Launching, LoadingUpdates)
                | (LoadingUpdates, LoadingUpdates)
                | (LoadingUpdates, Ready)
        )
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadingStatus {
    pub state: LoadingState,
    pub counter: i64,
}

/// Persisted loading state and load counter.
///
/// Writers are serialized by `writer`; readers only touch the in-memory
/// snapshot, which is replaced after each successful commit.
pub struct StatusController {
    admin: RepositoryHandle,
    writer: Mutex<()>,
    snapshot: RwLock<Option<LoadingStatus>>,
}

impl StatusController {
    pub fn new(admin: RepositoryHandle) -> Self {
        Self {
            admin,
            writer: Mutex::new(()),
            snapshot: RwLock::new(None),
        }
    }

    pub fn initialize(&self) -> Result<LoadingStatus, ReplicaError> {
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.get_state().is_some() {
            return Err(ReplicaError::AlreadyInitialized);
        }

        let status = in_transaction(self.admin.as_ref(), IsolationLevel::Serializable, |tx| {
            let state = read_single(tx, vocab::has_status())?;
            let counter = read_single(tx, vocab::has_registry_load_counter())?;
            match (state, counter) {
                (None, None) => {
                    let status = LoadingStatus {
                        state: LoadingState::Launching,
                        counter: -1,
                    };
                    write_status(tx, &status)?;
                    Ok(status)
                }
                (Some(state), Some(counter)) => {
                    let state = LoadingState::parse(state.value()).ok_or_else(|| {
                        ReplicaError::CorruptState(format!("unknown status {}", state.value()))
                    })?;
                    let counter = counter.as_i64().ok_or_else(|| {
                        ReplicaError::CorruptState(format!("load counter {counter}"))
                    })?;
                    Ok(LoadingStatus { state, counter })
                }
                (state, counter) => Err(ReplicaError::CorruptState(format!(
                    "status present: {}, counter present: {}",
                    state.is_some(),
                    counter.is_some()
                ))),
            }
        })?;

        self.publish(status);
        tracing::info!(state = %status.state, counter = status.counter, "loading status initialized");
        Ok(status)
    }

    /// Last committed status; `None` before `initialize`.
    pub fn get_state(&self) -> Option<LoadingStatus> {
        *self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_loading_initial(&self, counter: i64) -> Result<LoadingStatus, ReplicaError> {
        self.transition(LoadingState::LoadingInitial, Some(counter))
    }

    pub fn set_loading_updates(&self, counter: i64) -> Result<LoadingStatus, ReplicaError> {
        self.transition(LoadingState::LoadingUpdates, Some(counter))
    }

    pub fn set_ready(&self) -> Result<LoadingStatus, ReplicaError> {
        self.transition(LoadingState::Ready, None)
    }

    fn transition(
        &self,
        next: LoadingState,
        counter: Option<i64>,
    ) -> Result<LoadingStatus, ReplicaError> {
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.get_state().ok_or(ReplicaError::NotInitialized)?;

        if next == LoadingState::Ready && current.state == LoadingState::Ready {
            return Ok(current);
        }
        if !current.state.can_transition_to(next) {
            return Err(ReplicaError::InvalidTransition {
                from: current.state,
                to: next,
            });
        }
        let counter = counter.unwrap_or(current.counter);
        if counter < current.counter {
            return Err(ReplicaError::CounterDecrease {
                current: current.counter,
                requested: counter,
            });
        }

        let status = LoadingStatus {
            state: next,
            counter,
        };
        in_transaction(self.admin.as_ref(), IsolationLevel::Serializable, |tx| {
            write_status(tx, &status)
        })?;
        self.publish(status);
        if current.state != next {
            tracing::info!(from = %current.state, to = %next, counter, "loading state changed");
        }
        Ok(status)
    }

    fn publish(&self, status: LoadingStatus) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(status);
    }
}

fn status_pattern(predicate: Term) -> Pattern {
    Pattern::new()
        .subject(vocab::this_repo())
        .predicate(predicate)
        .graph(vocab::admin_graph())
}

fn read_single(tx: &mut dyn Transaction, predicate: Term) -> Result<Option<Term>, ReplicaError> {
    let mut found = tx.statements(&status_pattern(predicate.clone()))?;
    if found.len() > 1 {
        return Err(ReplicaError::CorruptState(format!(
            "{} values for {}",
            found.len(),
            predicate.value()
        )));
    }
    Ok(found.pop().map(|quad| quad.object))
}

fn write_status(tx: &mut dyn Transaction, status: &LoadingStatus) -> Result<(), ReplicaError> {
    tx.remove(&status_pattern(vocab::has_status()))?;
    tx.remove(&status_pattern(vocab::has_registry_load_counter()))?;
    tx.add(&[
        Quad::new(
            vocab::this_repo(),
            vocab::has_status(),
            Term::literal(status.state.as_str()),
            vocab::admin_graph(),
        ),
        Quad::new(
            vocab::this_repo(),
            vocab::has_registry_load_counter(),
            Term::long(status.counter),
            vocab::admin_graph(),
        ),
    ])
}
