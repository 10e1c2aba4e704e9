//! Hydration: full-snapshot fetch and reconciliation.
//!
//! Remote is authoritative for the organization record, users, and
//! tasks - still-pending local task edits re-apply through the queue.
//! Projects merge field-by-field:
//!
//! 1. a terminal remote lifecycle state (archived/completed/deleted)
//!    wins outright
//! 2. an older local copy loses outright
//! 3. otherwise remote is the base, but the local completion-approval
//!    fields and local version/updated_at stamp are retained, so a
//!    just-submitted approval survives a hydration race without
//!    permanently diverging once remote catches up
//!
//! Locally created projects whose Create or Update is still queued are
//! retained even when the snapshot lacks them - the remote has not
//! acknowledged them yet, so their absence is not a deletion.
//!
//! Concurrent hydrations for the same org within a short window share
//! one fetch; completed results are cached for the same window to
//! absorb bursts of near-simultaneous callers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pinboard_core::{EntityId, OrgId, Project, Versioned};

use crate::persist::PersistError;
use crate::remote::{RemoteApi, RemoteError};
use crate::store::LocalStore;

pub use crate::remote::RemoteSnapshot;

pub struct Hydrator {
    remote: Arc<dyn RemoteApi>,
    /// Dedup window: callers within this window share a result.
    window: Duration,
    /// Per-org fetch locks - a second caller blocks until the first
    /// fetch lands, then hits the result cache.
    locks: Mutex<HashMap<OrgId, Arc<Mutex<()>>>>,
    cache: Mutex<HashMap<OrgId, (Instant, RemoteSnapshot)>>,
}

impl Hydrator {
    pub fn new(remote: Arc<dyn RemoteApi>, window: Duration) -> Self {
        Self {
            remote,
            window,
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or reuse) a remote snapshot for one org.
    ///
    /// Takes no store access, so local reads stay unblocked for the
    /// duration of the network call.
    pub fn fetch(&self, org: &OrgId) -> Result<RemoteSnapshot, RemoteError> {
        let lock = {
            let mut locks = self.locks.lock().expect("hydration locks poisoned");
            locks.entry(org.clone()).or_default().clone()
        };
        let _guard = lock.lock().expect("hydration org lock poisoned");

        if let Some((at, snapshot)) = self
            .cache
            .lock()
            .expect("hydration cache poisoned")
            .get(org)
        {
            if at.elapsed() < self.window {
                tracing::debug!(%org, "hydration served from dedup cache");
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.remote.fetch_snapshot(org)?;
        self.cache
            .lock()
            .expect("hydration cache poisoned")
            .insert(org.clone(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    /// Reconcile a fetched snapshot into the store.
    ///
    /// `unflushed` lists project ids with a queued Create or Update;
    /// those projects survive even when the snapshot lacks them.
    pub fn reconcile(
        &self,
        store: &mut LocalStore,
        org: &OrgId,
        snapshot: &RemoteSnapshot,
        unflushed: &BTreeSet<EntityId>,
    ) -> Result<(), PersistError> {
        use crate::store::WriteSource;
        use pinboard_core::WallClock;

        // Org, users, tasks: remote wins wholesale.
        store.write_organization(
            snapshot.org.clone(),
            WriteSource::Hydration,
            WallClock::now(),
        )?;
        store.replace_users(org, snapshot.users.clone())?;
        store.replace_tasks(org, snapshot.tasks.clone())?;

        // Projects: field-aware merge against the local copies.
        let mut merged: Vec<Project> = snapshot
            .projects
            .iter()
            .map(|remote| {
                let local = store.project(remote.id());
                merge_project(local, remote)
            })
            .collect();

        // Local projects the remote has not acknowledged yet.
        let remote_ids: BTreeSet<&EntityId> = snapshot.projects.iter().map(|p| p.id()).collect();
        for local in store.projects(org) {
            if !remote_ids.contains(local.id()) && unflushed.contains(local.id()) {
                merged.push(local.clone());
            }
        }
        store.replace_projects(org, merged)?;

        tracing::debug!(
            %org,
            users = snapshot.users.len(),
            projects = snapshot.projects.len(),
            tasks = snapshot.tasks.len(),
            "hydration reconciled"
        );
        Ok(())
    }
}

/// Merge one project per the precedence rules in the module docs.
pub fn merge_project(local: Option<&Project>, remote: &Project) -> Project {
    let Some(local) = local else {
        return remote.clone();
    };

    // Terminal states are not locally overridable.
    if remote.state.is_terminal() {
        return remote.clone();
    }

    // Plain staleness: older local copy loses outright.
    if local.updated_at() < remote.updated_at() {
        return remote.clone();
    }

    // Local is newer or equal: converge to remote except the approval
    // request, which local owns until remote reflects it. Keeping the
    // local stamp means repeated hydrations keep protecting it.
    let mut merged = remote.clone();
    merged.completion_requested_at = local.completion_requested_at;
    merged.completion_requested_by = local.completion_requested_by.clone();
    merged.version = local.version;
    merged.updated_at = local.updated_at;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemPersistence;
    use crate::store::LocalStore;
    use crate::test_utils::InMemoryRemote;
    use pinboard_core::{ActorId, EntityId, Organization, ProjectState, Task, WallClock};

    fn org() -> OrgId {
        OrgId::new("acme").unwrap()
    }

    fn project(id: &str, updated_at: u64) -> Project {
        let mut p = Project::new(
            EntityId::new(id).unwrap(),
            org(),
            format!("project {id}"),
            WallClock(updated_at),
        );
        p.updated_at = WallClock(updated_at);
        p
    }

    fn snapshot_with_projects(projects: Vec<Project>) -> RemoteSnapshot {
        RemoteSnapshot {
            org: Organization::new(
                EntityId::new("org-acme").unwrap(),
                org(),
                "Acme",
                WallClock(1),
            ),
            users: vec![],
            projects,
            tasks: vec![],
        }
    }

    #[test]
    fn terminal_remote_state_wins_over_newer_local() {
        let mut local = project("p1", 200);
        local.completion_requested_at = Some(WallClock(190));
        let mut remote = project("p1", 100);
        remote.state = ProjectState::Archived;

        let merged = merge_project(Some(&local), &remote);
        assert_eq!(merged.state, ProjectState::Archived);
        assert_eq!(merged.updated_at, WallClock(100));
        // The local approval does not survive a terminal remote state.
        assert_eq!(merged.completion_requested_at, None);
    }

    #[test]
    fn older_local_loses_outright() {
        let mut local = project("p1", 90);
        local.completion_requested_at = Some(WallClock(80));
        let remote = project("p1", 100);

        let merged = merge_project(Some(&local), &remote);
        assert_eq!(merged.completion_requested_at, None);
        assert_eq!(merged.updated_at, WallClock(100));
    }

    #[test]
    fn newer_local_keeps_pending_approval() {
        let mut local = project("p1", 100);
        local.completion_requested_at = Some(WallClock(95));
        local.completion_requested_by = Some(ActorId::new("zoe").unwrap());
        let remote = project("p1", 90);

        let merged = merge_project(Some(&local), &remote);
        assert_eq!(merged.completion_requested_at, Some(WallClock(95)));
        assert_eq!(
            merged.completion_requested_by,
            Some(ActorId::new("zoe").unwrap())
        );
        // Local stamp retained so the next hydration still protects it.
        assert_eq!(merged.updated_at, WallClock(100));
    }

    #[test]
    fn newer_local_clears_approval_remote_still_carries() {
        let local = project("p1", 100);
        let mut remote = project("p1", 90);
        remote.completion_requested_at = Some(WallClock(85));

        let merged = merge_project(Some(&local), &remote);
        assert_eq!(merged.completion_requested_at, None);
    }

    #[test]
    fn hydration_replaces_tasks_wholesale() {
        let persist = Arc::new(MemPersistence::new());
        let mut store = LocalStore::open(persist).unwrap();
        let remote = Arc::new(InMemoryRemote::default());

        // Local task the remote does not know about.
        store
            .write_task(
                Task::new(EntityId::new("local-only").unwrap(), org(), "x", WallClock(1)),
                crate::store::WriteSource::Local,
                WallClock(1),
            )
            .unwrap();

        let mut snap = snapshot_with_projects(vec![]);
        snap.tasks.push(Task::new(
            EntityId::new("remote-task").unwrap(),
            org(),
            "from remote",
            WallClock(50),
        ));
        remote.set_snapshot(snap);

        let hydrator = Hydrator::new(remote, Duration::from_millis(1500));
        let snap = hydrator.fetch(&org()).unwrap();
        hydrator
            .reconcile(&mut store, &org(), &snap, &BTreeSet::new())
            .unwrap();

        assert!(store.task(&EntityId::new("local-only").unwrap()).is_none());
        assert!(store.task(&EntityId::new("remote-task").unwrap()).is_some());
    }

    #[test]
    fn unflushed_local_project_survives_reconcile() {
        let persist = Arc::new(MemPersistence::new());
        let mut store = LocalStore::open(persist).unwrap();
        let remote = Arc::new(InMemoryRemote::default());
        remote.set_snapshot(snapshot_with_projects(vec![project("p-remote", 50)]));

        store
            .write_project(
                project("p-local", 60),
                crate::store::WriteSource::Local,
                WallClock(60),
            )
            .unwrap();

        let hydrator = Hydrator::new(remote, Duration::ZERO);
        let snap = hydrator.fetch(&org()).unwrap();
        let unflushed = BTreeSet::from([EntityId::new("p-local").unwrap()]);
        hydrator
            .reconcile(&mut store, &org(), &snap, &unflushed)
            .unwrap();

        // Remote never saw the queued create; the project stays.
        assert!(store.project(&EntityId::new("p-local").unwrap()).is_some());
        assert!(store.project(&EntityId::new("p-remote").unwrap()).is_some());
    }

    #[test]
    fn local_project_without_queued_mutation_is_dropped() {
        let persist = Arc::new(MemPersistence::new());
        let mut store = LocalStore::open(persist).unwrap();
        let remote = Arc::new(InMemoryRemote::default());
        remote.set_snapshot(snapshot_with_projects(vec![]));

        store
            .write_project(
                project("p-stale", 60),
                crate::store::WriteSource::Local,
                WallClock(60),
            )
            .unwrap();

        let hydrator = Hydrator::new(remote, Duration::ZERO);
        let snap = hydrator.fetch(&org()).unwrap();
        hydrator
            .reconcile(&mut store, &org(), &snap, &BTreeSet::new())
            .unwrap();

        // Nothing queued for it, so its absence remotely is a deletion.
        assert!(store.project(&EntityId::new("p-stale").unwrap()).is_none());
    }

    #[test]
    fn dedup_window_absorbs_repeat_callers() {
        let remote = Arc::new(InMemoryRemote::default());
        remote.set_snapshot(snapshot_with_projects(vec![project("p1", 10)]));

        let hydrator = Hydrator::new(remote.clone(), Duration::from_secs(60));
        hydrator.fetch(&org()).unwrap();
        hydrator.fetch(&org()).unwrap();
        hydrator.fetch(&org()).unwrap();

        assert_eq!(remote.snapshot_fetches(), 1);
    }

    #[test]
    fn zero_window_disables_dedup() {
        let remote = Arc::new(InMemoryRemote::default());
        remote.set_snapshot(snapshot_with_projects(vec![]));

        let hydrator = Hydrator::new(remote.clone(), Duration::ZERO);
        hydrator.fetch(&org()).unwrap();
        hydrator.fetch(&org()).unwrap();

        assert_eq!(remote.snapshot_fetches(), 2);
    }
}
