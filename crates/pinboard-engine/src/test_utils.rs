//! Shared deterministic test fakes owned by the engine boundary.
//!
//! `InMemoryRemote` implements [`RemoteApi`] over a mutex-guarded map
//! and supports scripting failures per entity id, so tests can drive
//! every branch of the executor's classification without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use pinboard_core::{EntityId, OrgId, Organization, Task, WallClock};

use crate::queue::MutationKey;
use crate::remote::{RemoteApi, RemoteError, RemoteSnapshot};

/// Which failure to inject for a scripted entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedFailure {
    Transient,
    Auth,
    Permission,
    NotFound,
}

impl ScriptedFailure {
    fn to_error(self) -> RemoteError {
        match self {
            ScriptedFailure::Transient => RemoteError::Transient {
                reason: "scripted outage".into(),
            },
            ScriptedFailure::Auth => RemoteError::Auth,
            ScriptedFailure::Permission => RemoteError::Permission {
                reason: "scripted policy refusal".into(),
            },
            ScriptedFailure::NotFound => RemoteError::NotFound,
        }
    }
}

#[derive(Default)]
struct RemoteState {
    /// Snapshot served by `fetch_snapshot`.
    snapshot: Option<RemoteSnapshot>,
    /// Tasks served by `fetch_task`.
    tasks: HashMap<EntityId, Task>,
    /// Applied mutations, as "verb id" strings, in call order.
    calls: Vec<String>,
    /// Remaining scripted failures per entity id.
    failures: HashMap<String, (ScriptedFailure, u32)>,
    snapshot_fetches: usize,
}

/// In-memory [`RemoteApi`] fake.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    /// Script the next `count` calls touching `id` to fail.
    pub fn fail_next(&self, id: &str, failure: ScriptedFailure, count: u32) {
        self.lock().failures.insert(id.to_string(), (failure, count));
    }

    /// Every remote call observed so far, e.g. `"create t1"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn set_snapshot(&self, snapshot: RemoteSnapshot) {
        self.lock().snapshot = Some(snapshot);
    }

    pub fn set_task(&self, task: Task) {
        self.lock().tasks.insert(task.id.clone(), task);
    }

    pub fn remove_task(&self, id: &EntityId) {
        self.lock().tasks.remove(id);
    }

    pub fn snapshot_fetches(&self) -> usize {
        self.lock().snapshot_fetches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().expect("in-memory remote lock poisoned")
    }

    fn check_scripted(&self, id: &EntityId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some((failure, remaining)) = state.failures.get_mut(id.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failure.to_error());
            }
        }
        Ok(())
    }

    fn record(&self, verb: &str, id: &EntityId) {
        self.lock().calls.push(format!("{verb} {id}"));
    }
}

impl RemoteApi for InMemoryRemote {
    fn create(&self, key: &MutationKey, _payload: &Value) -> Result<(), RemoteError> {
        self.record("create", &key.id);
        self.check_scripted(&key.id)
    }

    fn update(&self, key: &MutationKey, _patch: &Value) -> Result<(), RemoteError> {
        self.record("update", &key.id);
        self.check_scripted(&key.id)
    }

    fn delete(&self, key: &MutationKey) -> Result<(), RemoteError> {
        self.record("delete", &key.id);
        self.check_scripted(&key.id)
    }

    fn fetch_snapshot(&self, org: &OrgId) -> Result<RemoteSnapshot, RemoteError> {
        let mut state = self.lock();
        state.snapshot_fetches += 1;
        match &state.snapshot {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Ok(empty_snapshot(org)),
        }
    }

    fn fetch_task(&self, _org: &OrgId, id: &EntityId) -> Result<Option<Task>, RemoteError> {
        self.check_scripted(id)?;
        Ok(self.lock().tasks.get(id).cloned())
    }
}

/// A snapshot with just a synthesized organization record.
pub fn empty_snapshot(org: &OrgId) -> RemoteSnapshot {
    let id = EntityId::new(format!("org-{org}")).expect("org id is non-empty");
    RemoteSnapshot {
        org: Organization::new(id, org.clone(), org.as_str().to_string(), WallClock(0)),
        users: Vec::new(),
        projects: Vec::new(),
        tasks: Vec::new(),
    }
}
