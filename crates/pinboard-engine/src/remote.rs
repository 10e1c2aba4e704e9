//! Remote backend port.
//!
//! The engine talks to a REST-shaped backend exposing per-organization
//! collections (users, projects, tasks) plus an aggregate hydration
//! endpoint. Transport is behind this trait; the engine depends only
//! on the call shapes and the failure taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use pinboard_core::{EntityId, OrgId, Organization, Project, Task, Transience, User};

use crate::queue::MutationKey;

/// Failure taxonomy for remote calls.
///
/// The three-way split is the engine's central design decision:
/// transient failures keep the mutation queued for eventual delivery,
/// auth failures pause the whole pipeline, permission failures are
/// terminal for one mutation without blocking the rest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    /// Network error, timeout, or server-side outage. Retryable.
    #[error("transient remote failure: {reason}")]
    Transient { reason: String },

    /// Credential invalid or expired. Pauses the flush pipeline.
    #[error("authentication required")]
    Auth,

    /// The backend refused the operation. Terminal for that mutation.
    #[error("operation forbidden: {reason}")]
    Permission { reason: String },

    /// The entity does not exist remotely.
    #[error("entity not found")]
    NotFound,
}

impl RemoteError {
    /// Classify an HTTP-style status code.
    ///
    /// 401 → Auth, 403 → Permission, 404 → NotFound; 408/429/5xx and
    /// anything unrecognized → Transient.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            401 => RemoteError::Auth,
            403 => RemoteError::Permission {
                reason: reason.into(),
            },
            404 => RemoteError::NotFound,
            _ => RemoteError::Transient {
                reason: reason.into(),
            },
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            RemoteError::Transient { .. } => Transience::Retryable,
            RemoteError::Auth => Transience::Unknown,
            RemoteError::Permission { .. } | RemoteError::NotFound => Transience::Permanent,
        }
    }
}

/// Full per-organization snapshot from the hydration endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub org: Organization,
    pub users: Vec<User>,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
}

/// The remote backend, as the engine sees it.
///
/// Mutations carry the same JSON shapes the queue stores: a full
/// payload for Create, a top-level patch (nulls clear) for Update.
pub trait RemoteApi: Send + Sync {
    fn create(&self, key: &MutationKey, payload: &Value) -> Result<(), RemoteError>;
    fn update(&self, key: &MutationKey, patch: &Value) -> Result<(), RemoteError>;
    fn delete(&self, key: &MutationKey) -> Result<(), RemoteError>;

    /// Aggregate fetch of org, users, projects, tasks.
    fn fetch_snapshot(&self, org: &OrgId) -> Result<RemoteSnapshot, RemoteError>;

    /// Targeted single-task fetch for entity-tagged change events.
    ///
    /// `Ok(None)` means the task no longer exists remotely.
    fn fetch_task(&self, org: &OrgId, id: &EntityId) -> Result<Option<Task>, RemoteError>;
}
