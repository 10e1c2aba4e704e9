//! End-to-end flows through the engine facade: offline edits, the
//! reconnect path, rejection signals, and hydration races.

use std::sync::Arc;

use pinboard_core::{
    ActorId, ClientId, EntityId, EventKind, OrgId, Patch, Project, ProjectPatch, ProjectState,
    Task, WallClock,
};
use pinboard_engine::test_utils::{InMemoryRemote, ScriptedFailure};
use pinboard_engine::{
    EngineConfig, EventBus, FsPersistence, LoopbackTransport, MemPersistence, SyncEngine,
};

fn org() -> OrgId {
    OrgId::new("acme").unwrap()
}

fn actor() -> ActorId {
    ActorId::new("zoe").unwrap()
}

fn entity(id: &str) -> EntityId {
    EntityId::new(id).unwrap()
}

fn engine(remote: Arc<InMemoryRemote>, transport: Arc<LoopbackTransport>) -> SyncEngine {
    let bus = Arc::new(EventBus::with_loopback(ClientId::generate(), transport));
    bus.set_active_org(Some(org()));
    SyncEngine::new(
        actor(),
        EngineConfig::default(),
        Arc::new(MemPersistence::new()),
        remote,
        bus,
    )
    .unwrap()
}

#[test]
fn offline_create_flushes_on_reconnect() {
    let remote = Arc::new(InMemoryRemote::default());
    let engine = engine(remote.clone(), Arc::new(LoopbackTransport::new()));

    engine.set_offline();
    let task = Task::new(entity("t1"), org(), "write report", WallClock(1));
    let stored = engine.create_task(task).unwrap();

    // Optimistic local state while offline.
    assert_eq!(stored.version, 1);
    assert!(engine.sync_pending().pending);
    assert_eq!(engine.pending_mutations(&org()), 1);
    assert!(remote.calls().is_empty());

    // The server will reflect the create by the time reconnect hydrates.
    let mut snapshot = pinboard_engine::test_utils::empty_snapshot(&org());
    snapshot.tasks.push(stored.clone());
    remote.set_snapshot(snapshot);

    let outcome = engine.on_reconnect(&org()).unwrap();
    assert_eq!(outcome.flushed, 1);
    assert_eq!(engine.pending_mutations(&org()), 0);
    assert!(!engine.sync_pending().pending);
    assert_eq!(remote.calls(), vec!["create t1".to_string()]);
    assert_eq!(engine.store().task(&entity("t1")).unwrap().version, 1);
}

#[test]
fn create_then_delete_offline_makes_no_remote_calls() {
    let remote = Arc::new(InMemoryRemote::default());
    let engine = engine(remote.clone(), Arc::new(LoopbackTransport::new()));

    engine.set_offline();
    let task = Task::new(entity("t1"), org(), "short lived", WallClock(1));
    engine.create_task(task).unwrap();
    engine.delete_task(&org(), &entity("t1")).unwrap();

    assert_eq!(engine.pending_mutations(&org()), 0);
    let outcome = engine.on_reconnect(&org()).unwrap();
    assert_eq!(outcome.flushed, 0);
    // The entity never left this client: no create, no delete.
    assert!(remote.calls().is_empty());
}

#[test]
fn permission_rejection_signals_and_continues() {
    let remote = Arc::new(InMemoryRemote::default());
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(remote.clone(), transport.clone());

    // A second client observing the bus sees the rejection signal.
    let observer = Arc::new(EventBus::with_loopback(ClientId::generate(), transport));
    observer.set_active_org(Some(org()));
    let observer_rx = observer.subscribe();

    engine.set_offline();
    engine
        .create_task(Task::new(entity("t1"), org(), "ok", WallClock(1)))
        .unwrap();
    engine
        .create_task(Task::new(entity("t2"), org(), "forbidden", WallClock(2)))
        .unwrap();
    engine
        .create_task(Task::new(entity("t3"), org(), "also ok", WallClock(3)))
        .unwrap();

    remote.fail_next("t2", ScriptedFailure::Permission, 1);
    let outcome = engine.on_reconnect(&org()).unwrap();

    assert_eq!(outcome.flushed, 2);
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].id, entity("t2"));
    // t3 went through despite t2's refusal, and t2 was not retried.
    let t2_calls = remote.calls().iter().filter(|c| c.ends_with("t2")).count();
    assert_eq!(t2_calls, 1);
    assert!(remote.calls().contains(&"create t3".to_string()));

    observer.pump();
    let kinds: Vec<EventKind> = observer_rx.try_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::ChangeRejected));
}

#[test]
fn auth_failure_pauses_pipeline_and_signals_reconnect() {
    let remote = Arc::new(InMemoryRemote::default());
    let transport = Arc::new(LoopbackTransport::new());
    let engine = engine(remote.clone(), transport.clone());

    let observer = Arc::new(EventBus::with_loopback(ClientId::generate(), transport));
    observer.set_active_org(Some(org()));
    let observer_rx = observer.subscribe();

    engine.set_offline();
    engine
        .create_task(Task::new(entity("t1"), org(), "a", WallClock(1)))
        .unwrap();
    engine
        .create_task(Task::new(entity("t2"), org(), "b", WallClock(2)))
        .unwrap();

    remote.fail_next("t1", ScriptedFailure::Auth, 1);
    let outcome = engine.on_reconnect(&org()).unwrap();

    assert!(outcome.auth_required);
    assert_eq!(outcome.remaining, 2);
    assert!(engine.sync_pending().pending);
    // No hydration while credentials are bad.
    assert_eq!(remote.snapshot_fetches(), 0);

    observer.pump();
    let kinds: Vec<EventKind> = observer_rx.try_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::ReconnectRequired));
}

#[test]
fn hydration_race_preserves_pending_completion_request() {
    let remote = Arc::new(InMemoryRemote::default());
    let engine = engine(remote.clone(), Arc::new(LoopbackTransport::new()));

    // Seed a project both sides know about.
    let project = Project::new(entity("p1"), org(), "launch", WallClock(10));
    engine.set_offline();
    let stored = engine.create_project(project).unwrap();

    // Local approval request lands after the remote copy's stamp.
    let patch = ProjectPatch {
        completion_requested_at: Patch::Set(WallClock(100)),
        completion_requested_by: Patch::Set(actor()),
        ..Default::default()
    };
    engine.update_project(&org(), &stored.id, patch).unwrap();

    // Remote snapshot is older and does not reflect the request yet.
    let mut remote_copy = Project::new(entity("p1"), org(), "launch", WallClock(90));
    remote_copy.updated_at = WallClock(90);
    let mut snapshot = pinboard_engine::test_utils::empty_snapshot(&org());
    snapshot.projects.push(remote_copy);
    remote.set_snapshot(snapshot);

    engine.hydrate(&org()).unwrap();

    let store = engine.store();
    let merged = store.project(&entity("p1")).unwrap();
    assert_eq!(merged.completion_requested_at, Some(WallClock(100)));
    assert_eq!(merged.completion_requested_by, Some(actor()));
}

#[test]
fn terminal_remote_state_overrides_newer_local() {
    let remote = Arc::new(InMemoryRemote::default());
    let engine = engine(remote.clone(), Arc::new(LoopbackTransport::new()));

    engine.set_offline();
    let stored = engine
        .create_project(Project::new(entity("p1"), org(), "launch", WallClock(10)))
        .unwrap();
    engine
        .update_project(
            &org(),
            &stored.id,
            ProjectPatch {
                name: Patch::Set("launch v2".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let mut archived = Project::new(entity("p1"), org(), "launch", WallClock(5));
    archived.updated_at = WallClock(5);
    archived.state = ProjectState::Archived;
    let mut snapshot = pinboard_engine::test_utils::empty_snapshot(&org());
    snapshot.projects.push(archived);
    remote.set_snapshot(snapshot);

    engine.hydrate(&org()).unwrap();

    let store = engine.store();
    let merged = store.project(&entity("p1")).unwrap();
    assert_eq!(merged.state, ProjectState::Archived);
    assert_eq!(merged.name, "launch");
}

#[test]
fn state_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemote::default());

    {
        let persist = Arc::new(FsPersistence::new(dir.path()).unwrap());
        let bus = Arc::new(EventBus::with_loopback(
            ClientId::generate(),
            Arc::new(LoopbackTransport::new()),
        ));
        bus.set_active_org(Some(org()));
        let engine =
            SyncEngine::new(actor(), EngineConfig::default(), persist, remote.clone(), bus)
                .unwrap();
        engine.set_offline();
        engine
            .create_task(Task::new(entity("t1"), org(), "durable", WallClock(1)))
            .unwrap();
    }

    // "Restart": a fresh engine over the same data directory resumes
    // with the same store, queue, and pending flag.
    let persist = Arc::new(FsPersistence::new(dir.path()).unwrap());
    let bus = Arc::new(EventBus::with_loopback(
        ClientId::generate(),
        Arc::new(LoopbackTransport::new()),
    ));
    bus.set_active_org(Some(org()));
    let engine = SyncEngine::new(actor(), EngineConfig::default(), persist, remote.clone(), bus)
        .unwrap();

    assert_eq!(engine.store().task(&entity("t1")).unwrap().title, "durable");
    assert_eq!(engine.pending_mutations(&org()), 1);
    assert!(engine.sync_pending().pending);

    let outcome = engine.on_reconnect(&org()).unwrap();
    assert_eq!(outcome.flushed, 1);
    assert_eq!(remote.calls(), vec!["create t1".to_string()]);
}
