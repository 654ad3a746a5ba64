mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;

use common::{Scripted, ScriptedRegistry};
use nanopub_replica::error::ReplicaError;
use nanopub_replica::ingest::{Ingestor, Mode};
use nanopub_replica::loader::{LoadOutcome, Loader};
use nanopub_replica::memory::MemoryTripleStore;
use nanopub_replica::rdf::{Pattern, Term};
use nanopub_replica::repository::{FULL, META};
use nanopub_replica::scheduler::ShutdownToken;
use nanopub_replica::status::{LoadingState, LoadingStatus, StatusController};
use nanopub_replica::vocab;

const KEY: &str = "key-alpha";

struct Harness {
    registry: Arc<ScriptedRegistry>,
    status: Arc<StatusController>,
    loader: Arc<Loader>,
    shutdown: ShutdownToken,
    ingestor: Ingestor<ScriptedRegistry>,
}

/// Service components over `store`, as a (re)started process would build them.
fn harness(store: &MemoryTripleStore, registry: Arc<ScriptedRegistry>) -> Harness {
    let cache = common::cache(store, 10);
    let status = Arc::new(StatusController::new(cache.admin().clone()));
    status.initialize().unwrap();
    let loader = Arc::new(Loader::new(cache, 1));
    let shutdown = ShutdownToken::new();
    let ingestor = Ingestor::new(
        registry.clone(),
        status.clone(),
        loader.clone(),
        shutdown.clone(),
        common::settings(),
    );
    Harness {
        registry,
        status,
        loader,
        shutdown,
        ingestor,
    }
}

fn ready(counter: i64) -> LoadingStatus {
    LoadingStatus {
        state: LoadingState::Ready,
        counter,
    }
}

#[test]
fn catch_up_loads_everything_and_ends_ready() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 1000, KEY);
    // the advertised counter is one past the last streamed record
    registry.set_target(1000);
    let h = harness(&store, registry);

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(999));
    assert_eq!(h.status.get_state(), Some(ready(999)));
    assert_eq!(common::loaded_count(&store, FULL), 1000);
    assert_eq!(
        common::repo_value(&store, FULL, vocab::has_nanopub_count()),
        Some(Term::long(1000))
    );
    assert_eq!(*h.registry.opened_after.lock().unwrap(), vec![-1, 999]);
}

#[test]
fn nothing_to_load_goes_straight_to_ready() {
    let store = MemoryTripleStore::new();
    let h = harness(&store, Arc::new(ScriptedRegistry::new()));

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(-1));
    assert!(h.registry.opened_after.lock().unwrap().is_empty());
}

#[test]
fn interrupted_stream_resumes_after_last_checkpoint() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 5, KEY);
    registry.push(Scripted::Interrupt);
    registry.publish(5, 10, KEY);
    let h = harness(&store, registry);

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(9));
    assert_eq!(*h.registry.opened_after.lock().unwrap(), vec![-1, 4]);
    assert_eq!(common::loaded_count(&store, FULL), 10);
}

#[test]
fn restart_after_unrecorded_load_does_not_double_count() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 6, KEY);
    {
        let h = harness(&store, registry.clone());
        h.status.set_loading_initial(-1).unwrap();
        for n in 0..=3 {
            h.loader.load(&common::nanopub(n, KEY)).unwrap();
            // the process dies after loading record 3 but before its checkpoint
            if n < 3 {
                h.status.set_loading_initial(n as i64).unwrap();
            }
        }
    }

    let h = harness(&store, registry);
    assert_eq!(
        h.status.get_state(),
        Some(LoadingStatus {
            state: LoadingState::LoadingInitial,
            counter: 2,
        })
    );
    assert_eq!(
        h.loader.load(&common::nanopub(3, KEY)).unwrap(),
        LoadOutcome::AlreadyLoaded
    );

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(5));
    assert_eq!(*h.registry.opened_after.lock().unwrap(), vec![2]);
    assert_eq!(common::loaded_count(&store, FULL), 6);
    assert_eq!(
        common::repo_value(&store, FULL, vocab::has_nanopub_count()),
        Some(Term::long(6))
    );
}

#[test]
fn regressing_counter_aborts_the_batch_without_moving_backwards() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.push(Scripted::Record(5, common::record(5, KEY)));
    registry.push(Scripted::Record(3, common::record(3, KEY)));
    registry.set_target(10);
    let h = harness(&store, registry);
    h.status.set_loading_initial(-1).unwrap();

    let err = h.ingestor.run_batch(Mode::Initial).unwrap_err();
    assert_matches!(
        &err,
        ReplicaError::CounterRegression {
            last: 5,
            received: 3
        }
    );
    assert!(!err.is_transient());
    assert_eq!(
        h.status.get_state(),
        Some(LoadingStatus {
            state: LoadingState::LoadingInitial,
            counter: 5,
        })
    );
    assert_eq!(common::loaded_count(&store, FULL), 1);
}

#[test]
fn failed_frame_is_retried_from_the_last_checkpoint() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 3, KEY);
    registry.push(Scripted::FailedOnce(3, "record 3 could not be serialized".to_string()));
    registry.publish(3, 6, KEY);
    let h = harness(&store, registry);

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(5));
    assert_eq!(*h.registry.opened_after.lock().unwrap(), vec![-1, 2]);
    assert_eq!(common::loaded_count(&store, FULL), 6);
}

#[test]
fn persistent_failed_frame_keeps_catch_up_retrying_until_shutdown() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 3, KEY);
    registry.push(Scripted::Failed(3, "unreadable".to_string()));
    registry.set_target(5);
    let h = harness(&store, registry);

    let result = thread::scope(|scope| {
        let catch_up = scope.spawn(|| h.ingestor.catch_up());
        let deadline = Instant::now() + Duration::from_secs(10);
        while h.registry.opened_after.lock().unwrap().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        h.shutdown.raise();
        catch_up.join().unwrap()
    });

    assert_matches!(result, Err(ReplicaError::Shutdown));
    let opened = h.registry.opened_after.lock().unwrap().clone();
    assert!(opened.len() >= 3, "{opened:?}");
    assert!(opened[1..].iter().all(|after| *after == 2));
    assert_eq!(
        h.status.get_state(),
        Some(LoadingStatus {
            state: LoadingState::LoadingInitial,
            counter: 2,
        })
    );
}

#[test]
fn undecodable_artifact_code_is_rejected_and_loading_moves_on() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    // well-formed shape, but the last symbol carries bits past the 32-byte hash
    let bad_uri = format!("https://w3id.org/np/RA{}", "B".repeat(43));
    registry.push(Scripted::Record(
        0,
        common::record_at(&bad_uri, 0, Some(KEY), &[common::TYPE_IRI]),
    ));
    registry.publish(1, 3, KEY);
    let h = harness(&store, registry);

    assert_eq!(h.ingestor.catch_up().unwrap(), ready(2));
    assert_eq!(*h.registry.opened_after.lock().unwrap(), vec![-1]);
    assert_eq!(common::loaded_count(&store, FULL), 2);
    assert_eq!(
        store.count_matching(
            META,
            &Pattern::new()
                .subject(Term::iri(bad_uri))
                .predicate(vocab::note())
        ),
        1
    );
}

#[test]
fn metadata_failures_within_budget_are_retried() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 2, KEY);
    *registry.metadata_failures.lock().unwrap() = 2;
    let h = harness(&store, registry);

    assert_eq!(h.ingestor.fetch_target().unwrap(), 1);
}

#[test]
fn registry_that_never_serves_exhausts_retries() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    *registry.status.lock().unwrap() = Some("launching".to_string());
    let h = harness(&store, registry);

    let err = h.ingestor.fetch_target().unwrap_err();
    assert_matches!(&err, ReplicaError::RetriesExhausted { attempts: 3, .. });
    assert!(err.is_transient());
}

#[test]
fn shutdown_interrupts_metadata_retries() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    *registry.metadata_failures.lock().unwrap() = 10;
    let h = harness(&store, registry);
    h.shutdown.raise();

    assert_matches!(h.ingestor.fetch_target(), Err(ReplicaError::Shutdown));
    assert_matches!(h.ingestor.catch_up(), Err(ReplicaError::Shutdown));
}

#[test]
fn poll_applies_new_records_and_returns_to_ready() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 3, KEY);
    let h = harness(&store, registry);
    h.ingestor.catch_up().unwrap();

    let idle = h.ingestor.poll().unwrap().unwrap();
    assert_eq!(idle.processed, 0);
    assert_eq!(h.status.get_state(), Some(ready(2)));

    h.registry.publish(3, 7, KEY);
    let report = h.ingestor.poll().unwrap().unwrap();
    assert_eq!(report.counter, 6);
    assert_eq!(report.loaded, 4);
    assert_eq!(h.status.get_state(), Some(ready(6)));
    assert_eq!(common::loaded_count(&store, FULL), 7);
}

#[test]
fn failed_poll_still_ends_ready() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 2, KEY);
    let h = harness(&store, registry);
    h.ingestor.catch_up().unwrap();

    h.registry.publish(2, 4, KEY);
    h.registry.push(Scripted::Failed(4, "broken".to_string()));
    h.registry.set_target(4);

    assert_matches!(h.ingestor.poll(), Err(ReplicaError::StreamFrame { counter: 4, .. }));
    assert_eq!(h.status.get_state(), Some(ready(3)));
}

#[test]
fn batch_without_progress_reports_counter_unchanged() {
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.set_target(4);
    let h = harness(&store, registry);
    h.status.set_loading_initial(-1).unwrap();

    let report = h.ingestor.run_batch(Mode::Initial).unwrap();
    assert_eq!(report.counter, -1);
    assert_eq!(report.processed, 0);
    assert!(!report.caught_up());
}
