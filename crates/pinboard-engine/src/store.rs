//! Durable local store - the source of truth for the UI.
//!
//! Reads are synchronous and always reflect the latest local write.
//! Local writes bump the entity version and refresh `updated_at`;
//! hydration writes take remote values verbatim (they represent
//! confirmed remote state) and bypass the bump.
//!
//! The store persists its whole snapshot after every write so a
//! process restart resumes from the last observed state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use pinboard_core::{EntityId, OrgId, Organization, Project, Task, User, Versioned, WallClock};

use crate::persist::{PersistError, Persistence};

const STORE_KEY: &str = "store.json";
const PENDING_KEY: &str = "sync_pending.json";

/// Where a write comes from, deciding version handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteSource {
    /// Optimistic local mutation: version +1, stamp refreshed.
    Local,
    /// Confirmed remote state from hydration: stored verbatim.
    Hydration,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    tasks: BTreeMap<EntityId, Task>,
    #[serde(default)]
    projects: BTreeMap<EntityId, Project>,
    #[serde(default)]
    users: BTreeMap<EntityId, User>,
    #[serde(default)]
    organizations: BTreeMap<EntityId, Organization>,
}

pub struct LocalStore {
    snapshot: StoreSnapshot,
    persist: Arc<dyn Persistence>,
}

macro_rules! store_accessors {
    ($read:ident, $read_one:ident, $write:ident, $remove:ident, $field:ident, $ty:ty) => {
        /// All entities of this kind for one org, ordered by id.
        pub fn $read(&self, org: &OrgId) -> Vec<&$ty> {
            self.snapshot
                .$field
                .values()
                .filter(|e| e.org() == org)
                .collect()
        }

        pub fn $read_one(&self, id: &EntityId) -> Option<&$ty> {
            self.snapshot.$field.get(id)
        }

        /// Write one entity and persist the snapshot.
        ///
        /// For `WriteSource::Local` the version is bumped relative to
        /// the previously stored entity (or set to 1 for new ones).
        pub fn $write(
            &mut self,
            mut entity: $ty,
            source: WriteSource,
            now: WallClock,
        ) -> Result<$ty, PersistError> {
            if source == WriteSource::Local {
                match self.snapshot.$field.get(entity.id()) {
                    Some(prev) => {
                        entity.version = prev.version();
                        entity.updated_at = prev.updated_at();
                        entity.bump(now);
                    }
                    None => {
                        entity.version = entity.version.max(1);
                        entity.updated_at = now;
                    }
                }
            }
            self.snapshot.$field.insert(entity.id().clone(), entity.clone());
            self.save()?;
            Ok(entity)
        }

        pub fn $remove(&mut self, id: &EntityId) -> Result<Option<$ty>, PersistError> {
            let removed = self.snapshot.$field.remove(id);
            if removed.is_some() {
                self.save()?;
            }
            Ok(removed)
        }
    };
}

impl LocalStore {
    /// Open the store, loading any persisted snapshot.
    ///
    /// A corrupt snapshot is discarded with a warning rather than
    /// wedging startup; the next hydration rebuilds it.
    pub fn open(persist: Arc<dyn Persistence>) -> Result<Self, PersistError> {
        let snapshot = match persist.load(STORE_KEY)? {
            None => StoreSnapshot::default(),
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    tracing::warn!("local store snapshot parse failed, starting empty: {err}");
                    StoreSnapshot::default()
                }
            },
        };
        Ok(Self { snapshot, persist })
    }

    store_accessors!(tasks, task, write_task, remove_task, tasks, Task);
    store_accessors!(projects, project, write_project, remove_project, projects, Project);
    store_accessors!(users, user, write_user, remove_user, users, User);
    store_accessors!(
        organizations,
        organization,
        write_organization,
        remove_organization,
        organizations,
        Organization
    );

    /// Replace every user of an org with the remote set (hydration).
    pub fn replace_users(&mut self, org: &OrgId, users: Vec<User>) -> Result<(), PersistError> {
        self.snapshot.users.retain(|_, u| u.org() != org);
        for user in users {
            self.snapshot.users.insert(user.id().clone(), user);
        }
        self.save()
    }

    /// Replace every task of an org with the remote set (hydration).
    pub fn replace_tasks(&mut self, org: &OrgId, tasks: Vec<Task>) -> Result<(), PersistError> {
        self.snapshot.tasks.retain(|_, t| t.org() != org);
        for task in tasks {
            self.snapshot.tasks.insert(task.id().clone(), task);
        }
        self.save()
    }

    /// Replace every project of an org (caller has already merged).
    pub fn replace_projects(
        &mut self,
        org: &OrgId,
        projects: Vec<Project>,
    ) -> Result<(), PersistError> {
        self.snapshot.projects.retain(|_, p| p.org() != org);
        for project in projects {
            self.snapshot.projects.insert(project.id().clone(), project);
        }
        self.save()
    }

    fn save(&self) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec(&self.snapshot).map_err(|err| PersistError::Corrupt {
            key: STORE_KEY.into(),
            reason: err.to_string(),
        })?;
        self.persist.save(STORE_KEY, &bytes)
    }
}

/// "Local state may be ahead of remote."
///
/// Set on every local mutation; cleared only when a flush fully
/// succeeds or a hydration confirms remote is caught up. Persisted so
/// a restart resumes with the same indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPending {
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<WallClock>,
}

impl SyncPending {
    pub fn load(persist: &dyn Persistence) -> Result<Self, PersistError> {
        let Some(bytes) = persist.load(PENDING_KEY)? else {
            return Ok(Self::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(flag) => Ok(flag),
            Err(err) => {
                tracing::warn!("sync pending flag parse failed, assuming pending: {err}");
                // Safer to assume local changes exist than to drop them.
                Ok(Self {
                    pending: true,
                    since: None,
                })
            }
        }
    }

    /// Mark pending at `now`. Keeps the original `since` if already set.
    ///
    /// Returns true if the visible state flipped.
    pub fn mark(&mut self, persist: &dyn Persistence, now: WallClock) -> Result<bool, PersistError> {
        let flipped = !self.pending;
        self.pending = true;
        if self.since.is_none() {
            self.since = Some(now);
        }
        self.save(persist)?;
        Ok(flipped)
    }

    /// Clear after a fully successful flush or confirming hydration.
    ///
    /// Returns true if the visible state flipped.
    pub fn clear(&mut self, persist: &dyn Persistence) -> Result<bool, PersistError> {
        let flipped = self.pending;
        self.pending = false;
        self.since = None;
        self.save(persist)?;
        Ok(flipped)
    }

    fn save(&self, persist: &dyn Persistence) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec(self).map_err(|err| PersistError::Corrupt {
            key: PENDING_KEY.into(),
            reason: err.to_string(),
        })?;
        persist.save(PENDING_KEY, &bytes)
    }
}
