//! Domain events broadcast between clients.
//!
//! Events are coarse change notifications, not data carriers: a
//! receiver re-reads the store (or re-fetches one entity) rather than
//! trusting the event payload. They are ephemeral and never persisted.

use serde::{Deserialize, Serialize};

use super::identity::{ActorId, ClientId, EntityId, OrgId};

/// What changed, or which pipeline signal fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TasksChanged,
    ProjectsChanged,
    UsersChanged,
    /// The sync-pending indicator flipped.
    SyncStateChanged,
    /// Credentials are invalid; the flush pipeline is paused.
    ReconnectRequired,
    /// The backend refused a mutation; local state is stale.
    ChangeRejected,
}

/// A change notification tagged with its origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub org: OrgId,
    pub actor: ActorId,
    /// The engine instance that produced the event. Receivers drop
    /// their own echo.
    pub origin: ClientId,
    /// Specific entity for targeted re-reads. `None` means the whole
    /// collection may have changed (coarse event, full hydration).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityId>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, org: OrgId, actor: ActorId, origin: ClientId) -> Self {
        Self {
            kind,
            org,
            actor,
            origin,
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Coarse events have no specific entity and demand a full
    /// hydration rather than a targeted re-read.
    pub fn is_coarse(&self) -> bool {
        self.entity.is_none()
    }
}
