mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;

use common::{Scripted, ScriptedRegistry};
use nanopub_replica::app::App;
use nanopub_replica::backend::TripleStore;
use nanopub_replica::memory::MemoryTripleStore;
use nanopub_replica::nanopub::short_pubkey_name;
use nanopub_replica::rdf::Term;
use nanopub_replica::repository::{ADMIN, EMPTY, FULL, META};
use nanopub_replica::status::{LoadingState, LoadingStatus};

const KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAu3XjZ5kq0pJmv2";

fn start(
    store: &MemoryTripleStore,
    registry: &Arc<ScriptedRegistry>,
    dir: &Utf8Path,
) -> App<Arc<ScriptedRegistry>> {
    let backend: Arc<dyn TripleStore> = Arc::new(store.clone());
    App::start(common::resolved_config(dir.as_str()), backend, registry.clone()).unwrap()
}

fn wait_for<F: Fn(Option<LoadingStatus>) -> bool>(
    app: &App<Arc<ScriptedRegistry>>,
    condition: F,
) -> Option<LoadingStatus> {
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let state = app.get_state();
        if condition(state) || Instant::now() > deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn ready(counter: i64) -> Option<LoadingStatus> {
    Some(LoadingStatus {
        state: LoadingState::Ready,
        counter,
    })
}

#[test]
fn catches_up_then_follows_new_records() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 5, KEY);

    let app = start(&store, &registry, dir);
    assert_eq!(wait_for(&app, |state| state == ready(4)), ready(4));

    registry.publish(5, 8, KEY);
    assert_eq!(wait_for(&app, |state| state == ready(7)), ready(7));
    assert_eq!(common::loaded_count(&store, FULL), 8);

    let status = app.status();
    assert_eq!(status.gauges.load_counter, Some(7));
    assert_eq!(status.gauges.states.get("READY"), Some(&1));
    assert_eq!(status.gauges.states.get("LAUNCHING"), Some(&0));
    assert_eq!(status.gauges.type_repositories, Some(1));
    assert_eq!(status.gauges.pubkey_repositories, Some(1));

    app.shutdown();
    assert_eq!(store.open_handles(), 0);
}

#[test]
fn repositories_are_listed_with_their_scope() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 2, KEY);

    let app = start(&store, &registry, dir);
    wait_for(&app, |state| state == ready(1));

    let repos = app.repos().unwrap();
    assert!(repos.available);
    let scope_of = |prefix: &str| {
        repos
            .repositories
            .iter()
            .find(|entry| entry.name.starts_with(prefix))
            .and_then(|entry| entry.scope.clone())
    };
    assert_eq!(scope_of("type_"), Some(common::TYPE_IRI.to_string()));
    assert_eq!(scope_of("pubkey_"), Some(short_pubkey_name(KEY)));
    for name in [ADMIN, EMPTY, FULL, META] {
        let entry = repos.repositories.iter().find(|entry| entry.name == name).unwrap();
        assert_eq!(entry.scope, None);
    }
    assert!(app.connection(FULL).is_some());

    store.set_listing_unavailable(true);
    let repos = app.repos().unwrap();
    assert!(!repos.available);
    assert_eq!(app.gauges().total_repositories, None);

    app.shutdown();
}

#[test]
fn manual_load_reports_each_uri() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 2, KEY);
    registry
        .records
        .lock()
        .unwrap()
        .insert(common::uri_for(50), common::record(50, KEY));

    let app = start(&store, &registry, dir);
    wait_for(&app, |state| state == ready(1));

    let result = app.load(&[
        common::uri_for(50),
        common::uri_for(0),
        "https://w3id.org/np/RAmissing".to_string(),
    ]);
    let outcomes: Vec<_> = result
        .items
        .iter()
        .map(|item| item.outcome.as_deref())
        .collect();
    assert_eq!(outcomes, vec![Some("loaded"), Some("already-loaded"), None]);
    assert!(result.items[2].error.is_some());
    let manual = Term::iri(common::uri_for(50));
    assert!(app.loader().is_loaded(&manual).unwrap());

    app.shutdown();
}

#[test]
fn failed_frame_does_not_stop_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 2, KEY);
    registry.push(Scripted::Failed(2, "unreadable".to_string()));
    registry.set_target(5);

    let app = start(&store, &registry, dir);
    let deadline = Instant::now() + Duration::from_secs(15);
    while registry.opened_after.lock().unwrap().len() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        app.get_state(),
        Some(LoadingStatus {
            state: LoadingState::LoadingInitial,
            counter: 1,
        })
    );

    // the registry recovers and serves the record it failed on
    registry
        .frames
        .lock()
        .unwrap()
        .retain(|frame| !matches!(frame, Scripted::Failed(..)));
    registry.publish(2, 5, KEY);
    assert_eq!(wait_for(&app, |state| state == ready(4)), ready(4));

    registry.publish(5, 6, KEY);
    assert_eq!(wait_for(&app, |state| state == ready(5)), ready(5));

    app.shutdown();
    assert_eq!(store.open_handles(), 0);
}

#[test]
fn restart_after_ready_skips_the_initial_load() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry.publish(0, 3, KEY);

    let app = start(&store, &registry, dir);
    wait_for(&app, |state| state == ready(2));
    app.shutdown();

    registry.publish(3, 4, KEY);
    let app = start(&store, &registry, dir);
    assert_eq!(app.get_state().map(|status| status.counter), Some(2));
    assert_eq!(wait_for(&app, |state| state == ready(3)), ready(3));
    app.shutdown();
    assert_eq!(common::loaded_count(&store, FULL), 4);
}

#[test]
fn local_files_are_loaded_before_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(dir.path()).unwrap();
    std::fs::write(dir.join("nanopub-uris.txt"), format!("{}\n", common::uri_for(90))).unwrap();
    let store = MemoryTripleStore::new();
    let registry = Arc::new(ScriptedRegistry::new());
    registry
        .records
        .lock()
        .unwrap()
        .insert(common::uri_for(90), common::record(90, KEY));
    registry.publish(0, 1, KEY);

    let app = start(&store, &registry, dir);
    assert_eq!(wait_for(&app, |state| state == ready(0)), ready(0));
    assert_eq!(common::loaded_count(&store, FULL), 2);
    app.shutdown();
}
