//! Engine facade - the single mutation path.
//!
//! Each mutation:
//! 1. Validates input
//! 2. Writes the local store (optimistic, synchronous)
//! 3. Enqueues the remote call, coalescing per key
//! 4. Marks the sync-pending flag
//! 5. Publishes a domain event and schedules a debounced flush
//!
//! Flushes and hydrations are driven by the owning runtime: a
//! background loop calls [`SyncEngine::tick`] around
//! [`SyncEngine::next_deadline`], the reconnect detector calls
//! [`SyncEngine::on_reconnect`], and the transport glue feeds incoming
//! events through [`SyncEngine::on_remote_event`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use pinboard_core::{
    ActorId, ClientId, DomainEvent, EntityId, EntityKind, EventKind, OrgId, Project, ProjectPatch,
    Task, TaskPatch, WallClock,
};

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{FlushOutcome, SyncExecutor};
use crate::hydrate::{Hydrator, RemoteSnapshot};
use crate::persist::Persistence;
use crate::queue::{MutationKey, MutationQueue};
use crate::remote::RemoteApi;
use crate::scheduler::FlushScheduler;
use crate::store::{LocalStore, SyncPending, WriteSource};
use crate::Result;

pub struct SyncEngine {
    actor: ActorId,
    config: EngineConfig,
    persist: Arc<dyn Persistence>,
    remote: Arc<dyn RemoteApi>,
    store: Mutex<LocalStore>,
    queue: Mutex<MutationQueue>,
    pending: Mutex<SyncPending>,
    executor: SyncExecutor,
    hydrator: Hydrator,
    bus: Arc<EventBus>,
    scheduler: Mutex<FlushScheduler>,
    online: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        actor: ActorId,
        config: EngineConfig,
        persist: Arc<dyn Persistence>,
        remote: Arc<dyn RemoteApi>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let store = LocalStore::open(persist.clone())?;
        let queue = MutationQueue::open(persist.clone())?;
        let pending = SyncPending::load(persist.as_ref())?;
        let executor = SyncExecutor::new(remote.clone(), config.retry.policy());
        let hydrator = Hydrator::new(remote.clone(), config.dedup_window());
        let scheduler = FlushScheduler::new(config.flush_debounce());
        Ok(Self {
            actor,
            config,
            persist,
            remote,
            store: Mutex::new(store),
            queue: Mutex::new(queue),
            pending: Mutex::new(pending),
            executor,
            hydrator,
            bus,
            scheduler: Mutex::new(scheduler),
            online: AtomicBool::new(true),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.bus.origin()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Synchronous view of local state. Hold briefly.
    pub fn store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().expect("store lock poisoned")
    }

    /// Count of queued mutations for an org - the user-visible
    /// "not yet synced" indicator alongside the pending flag.
    pub fn pending_mutations(&self, org: &OrgId) -> usize {
        self.queue().pending_for(org)
    }

    pub fn sync_pending(&self) -> SyncPending {
        *self.pending.lock().expect("pending lock poisoned")
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create a task locally and queue the remote Create.
    pub fn create_task(&self, task: Task) -> Result<Task> {
        if task.title.trim().is_empty() {
            return Err(pinboard_core::CoreError::ValidationFailed {
                field: "title".into(),
                reason: "title cannot be empty".into(),
            }
            .into());
        }
        let now = WallClock::now();
        let stored = self
            .store()
            .write_task(task, WriteSource::Local, now)?;
        let key = MutationKey::new(stored.org.clone(), EntityKind::Task, stored.id.clone());
        let payload = self.to_value(&stored)?;
        self.queue().enqueue_create(key, payload, now)?;
        self.after_mutation(&stored.org, EventKind::TasksChanged, Some(stored.id.clone()), now)?;
        Ok(stored)
    }

    /// Patch a task locally and queue the remote Update.
    pub fn update_task(&self, org: &OrgId, id: &EntityId, patch: TaskPatch) -> Result<Task> {
        patch.validate()?;
        let now = WallClock::now();
        let stored = {
            let mut store = self.store();
            let mut task = store
                .task(id)
                .filter(|t| &t.org == org)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            patch.clone().apply_to(&mut task);
            store.write_task(task, WriteSource::Local, now)?
        };
        let key = MutationKey::new(org.clone(), EntityKind::Task, id.clone());
        let patch = self.to_value(&patch)?;
        self.queue().enqueue_update(key, patch, now)?;
        self.after_mutation(org, EventKind::TasksChanged, Some(id.clone()), now)?;
        Ok(stored)
    }

    /// Delete a task locally and queue the remote Delete.
    pub fn delete_task(&self, org: &OrgId, id: &EntityId) -> Result<()> {
        let now = WallClock::now();
        {
            let mut store = self.store();
            if store.task(id).is_none_or(|t| &t.org != org) {
                return Err(EngineError::NotFound(id.clone()));
            }
            store.remove_task(id)?;
        }
        let key = MutationKey::new(org.clone(), EntityKind::Task, id.clone());
        self.queue().enqueue_delete(key, now)?;
        self.after_mutation(org, EventKind::TasksChanged, Some(id.clone()), now)?;
        Ok(())
    }

    /// Create a project locally and queue the remote Create.
    pub fn create_project(&self, project: Project) -> Result<Project> {
        if project.name.trim().is_empty() {
            return Err(pinboard_core::CoreError::ValidationFailed {
                field: "name".into(),
                reason: "name cannot be empty".into(),
            }
            .into());
        }
        let now = WallClock::now();
        let stored = self
            .store()
            .write_project(project, WriteSource::Local, now)?;
        let key = MutationKey::new(stored.org.clone(), EntityKind::Project, stored.id.clone());
        let payload = self.to_value(&stored)?;
        self.queue().enqueue_create(key, payload, now)?;
        self.after_mutation(
            &stored.org,
            EventKind::ProjectsChanged,
            Some(stored.id.clone()),
            now,
        )?;
        Ok(stored)
    }

    /// Patch a project locally and queue the remote Update.
    pub fn update_project(
        &self,
        org: &OrgId,
        id: &EntityId,
        patch: ProjectPatch,
    ) -> Result<Project> {
        patch.validate()?;
        let now = WallClock::now();
        let stored = {
            let mut store = self.store();
            let mut project = store
                .project(id)
                .filter(|p| &p.org == org)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            patch.clone().apply_to(&mut project);
            store.write_project(project, WriteSource::Local, now)?
        };
        let key = MutationKey::new(org.clone(), EntityKind::Project, id.clone());
        let patch = self.to_value(&patch)?;
        self.queue().enqueue_update(key, patch, now)?;
        self.after_mutation(org, EventKind::ProjectsChanged, Some(id.clone()), now)?;
        Ok(stored)
    }

    /// Delete a project locally and queue the remote Delete.
    pub fn delete_project(&self, org: &OrgId, id: &EntityId) -> Result<()> {
        let now = WallClock::now();
        {
            let mut store = self.store();
            if store.project(id).is_none_or(|p| &p.org != org) {
                return Err(EngineError::NotFound(id.clone()));
            }
            store.remove_project(id)?;
        }
        let key = MutationKey::new(org.clone(), EntityKind::Project, id.clone());
        self.queue().enqueue_delete(key, now)?;
        self.after_mutation(org, EventKind::ProjectsChanged, Some(id.clone()), now)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync driving
    // ------------------------------------------------------------------

    /// Flush the queue for one org (or everything) right now.
    ///
    /// Terminally rejected entries trigger a hydration so stale local
    /// state converges back to remote.
    pub fn flush_now(&self, org: Option<&OrgId>) -> Result<FlushOutcome> {
        let was_pending = self.sync_pending().pending;
        // The executor takes the queue/pending locks itself, only for
        // the snapshot and per-entry confirmations; mutations keep
        // landing while the remote calls run.
        let outcome = self
            .executor
            .flush(&self.queue, &self.pending, self.persist.as_ref(), org);
        if was_pending && !self.sync_pending().pending {
            self.publish_signal(org, EventKind::SyncStateChanged, None);
        }

        if outcome.auth_required {
            tracing::warn!("flush paused: reconnect required");
            self.publish_signal(org, EventKind::ReconnectRequired, None);
            return Ok(outcome);
        }

        if !outcome.rejected.is_empty() {
            for key in &outcome.rejected {
                self.publish_signal(Some(&key.org), EventKind::ChangeRejected, Some(key.id.clone()));
            }
            // Local optimistic copies of the rejected entries are stale.
            let orgs: std::collections::BTreeSet<&OrgId> =
                outcome.rejected.iter().map(|k| &k.org).collect();
            for org in orgs {
                if let Err(err) = self.hydrate(org) {
                    tracing::error!(%org, "post-rejection hydration failed: {err}");
                }
            }
        }

        if outcome.remaining > 0 {
            // Entries survived the pass (transient exhaustion): retry
            // later with a backed-off deadline.
            if let Some(org) = org {
                self.scheduler().schedule_after(
                    org.clone(),
                    self.config.retry.policy().max_delay,
                );
            }
        }

        Ok(outcome)
    }

    /// Fetch a remote snapshot (deduplicated) and reconcile it.
    ///
    /// A hydration that confirms nothing is queued also clears the
    /// pending flag - remote has caught up with local intent.
    pub fn hydrate(&self, org: &OrgId) -> Result<RemoteSnapshot> {
        // Fetch before touching the store: reads stay unblocked for
        // the duration of the network call.
        let snapshot = self.hydrator.fetch(org)?;
        let unflushed = self.queue().pending_upserts(org, EntityKind::Project);
        {
            let mut store = self.store();
            self.hydrator
                .reconcile(&mut store, org, &snapshot, &unflushed)?;
        }
        if self.queue().is_empty() {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if pending.clear(self.persist.as_ref())? {
                self.publish_signal(Some(org), EventKind::SyncStateChanged, None);
            }
        }
        Ok(snapshot)
    }

    /// Connectivity restored: flush everything pending, then hydrate.
    pub fn on_reconnect(&self, org: &OrgId) -> Result<FlushOutcome> {
        self.online.store(true, Ordering::Relaxed);
        let outcome = self.flush_now(Some(org))?;
        if !outcome.auth_required {
            self.hydrate(org)?;
        }
        Ok(outcome)
    }

    /// Going offline disarms every scheduled flush; the queue itself
    /// is untouched and reconnect flushes it explicitly.
    pub fn set_offline(&self) {
        self.online.store(false, Ordering::Relaxed);
        self.scheduler().cancel_all();
    }

    /// Drive due flushes. The safety-net pass is skipped while known
    /// offline rather than attempted and timed out.
    pub fn tick(&self, now: Instant) -> Result<()> {
        if !self.is_online() {
            tracing::debug!("offline, skipping safety-net flush");
            return Ok(());
        }
        // Release the scheduler lock before flushing: a failed flush
        // reschedules with backoff through the same lock.
        let due = { self.scheduler().drain_due(now) };
        for org in due {
            self.flush_now(Some(&org))?;
        }
        Ok(())
    }

    /// Next scheduler deadline, for the owner's sleep loop.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler().next_deadline()
    }

    /// React to a change event from another client (already filtered
    /// by the bus): targeted re-read for an entity-tagged task event,
    /// full hydration for everything coarse.
    pub fn on_remote_event(&self, event: &DomainEvent) -> Result<()> {
        match (event.kind, &event.entity) {
            (EventKind::TasksChanged, Some(id)) => {
                match self.remote.fetch_task(&event.org, id)? {
                    Some(task) => {
                        self.store()
                            .write_task(task, WriteSource::Hydration, WallClock::now())?;
                    }
                    None => {
                        self.store().remove_task(id)?;
                    }
                }
                Ok(())
            }
            (EventKind::TasksChanged | EventKind::ProjectsChanged | EventKind::UsersChanged, _) => {
                self.hydrate(&event.org)?;
                Ok(())
            }
            // Pipeline signals carry no data to re-read.
            (
                EventKind::SyncStateChanged
                | EventKind::ReconnectRequired
                | EventKind::ChangeRejected,
                _,
            ) => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn after_mutation(
        &self,
        org: &OrgId,
        kind: EventKind,
        entity: Option<EntityId>,
        now: WallClock,
    ) -> Result<()> {
        let flipped = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .mark(self.persist.as_ref(), now)?;
        if flipped {
            self.publish_signal(Some(org), EventKind::SyncStateChanged, None);
        }

        let mut event = DomainEvent::new(kind, org.clone(), self.actor.clone(), self.bus.origin());
        if let Some(entity) = entity {
            event = event.with_entity(entity);
        }
        self.bus.publish(event);

        if self.is_online() {
            self.scheduler().schedule(org.clone());
        }
        Ok(())
    }

    fn publish_signal(&self, org: Option<&OrgId>, kind: EventKind, entity: Option<EntityId>) {
        // Signals without an org scope are skipped: every event is
        // org-tagged on the wire.
        let Some(org) = org else { return };
        let mut event = DomainEvent::new(kind, org.clone(), self.actor.clone(), self.bus.origin());
        if let Some(entity) = entity {
            event = event.with_entity(entity);
        }
        self.bus.publish(event);
    }

    fn to_value<T: serde::Serialize>(&self, value: &T) -> Result<serde_json::Value> {
        serde_json::to_value(value).map_err(|err| {
            pinboard_core::CoreError::ValidationFailed {
                field: "payload".into(),
                reason: err.to_string(),
            }
            .into()
        })
    }

    fn queue(&self) -> MutexGuard<'_, MutationQueue> {
        self.queue.lock().expect("queue lock poisoned")
    }

    fn scheduler(&self) -> MutexGuard<'_, FlushScheduler> {
        self.scheduler.lock().expect("scheduler lock poisoned")
    }
}
