//! Entity model: Task, Project, User, Organization.
//!
//! Every entity carries a monotonic `version` (>= 1, bumped on each
//! local write) and an `updated_at` wall-clock stamp. The hydration
//! merge depends on this discipline: no entity is ever mutated in
//! place without a bump.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Priority, ProjectState, TaskStatus};
use super::identity::{ActorId, EntityId, OrgId};
use super::time::WallClock;

/// Common surface of all versioned entities.
pub trait Versioned {
    fn id(&self) -> &EntityId;
    fn org(&self) -> &OrgId;
    fn version(&self) -> u64;
    fn updated_at(&self) -> WallClock;

    /// Record a local write: version +1, stamp refreshed.
    ///
    /// `updated_at` never moves backwards even if the wall clock does.
    fn bump(&mut self, now: WallClock);
}

macro_rules! impl_versioned {
    ($ty:ident) => {
        impl Versioned for $ty {
            fn id(&self) -> &EntityId {
                &self.id
            }
            fn org(&self) -> &OrgId {
                &self.org
            }
            fn version(&self) -> u64 {
                self.version
            }
            fn updated_at(&self) -> WallClock {
                self.updated_at
            }
            fn bump(&mut self, now: WallClock) {
                self.version += 1;
                self.updated_at = self.updated_at.max(now);
            }
        }
    };
}

/// A comment attached to a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: ActorId,
    pub at: WallClock,
    pub body: String,
}

/// A ticket on a board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub org: OrgId,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<WallClock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<ActorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// When the work timer was started, if running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_started_at: Option<WallClock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    /// Free-form secondary fields the engine carries but does not interpret.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    pub version: u64,
    pub updated_at: WallClock,
}

impl Task {
    pub fn new(id: EntityId, org: OrgId, title: impl Into<String>, now: WallClock) -> Self {
        Self {
            id,
            org,
            title: title.into(),
            status: TaskStatus::default(),
            priority: Priority::default(),
            due_at: None,
            assignees: Vec::new(),
            tags: Vec::new(),
            timer_started_at: None,
            comments: Vec::new(),
            meta: BTreeMap::new(),
            version: 1,
            updated_at: now,
        }
    }
}

impl_versioned!(Task);

/// A board/project grouping tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub org: OrgId,
    pub name: String,
    #[serde(default)]
    pub state: ProjectState,
    /// Pending completion-approval request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_requested_at: Option<WallClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_requested_by: Option<ActorId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    pub version: u64,
    pub updated_at: WallClock,
}

impl Project {
    pub fn new(id: EntityId, org: OrgId, name: impl Into<String>, now: WallClock) -> Self {
        Self {
            id,
            org,
            name: name.into(),
            state: ProjectState::default(),
            completion_requested_at: None,
            completion_requested_by: None,
            meta: BTreeMap::new(),
            version: 1,
            updated_at: now,
        }
    }

    pub fn has_pending_completion_request(&self) -> bool {
        self.completion_requested_at.is_some()
    }
}

impl_versioned!(Project);

/// An organization member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    pub org: OrgId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub version: u64,
    pub updated_at: WallClock,
}

impl User {
    pub fn new(id: EntityId, org: OrgId, name: impl Into<String>, now: WallClock) -> Self {
        Self {
            id,
            org,
            name: name.into(),
            email: None,
            version: 1,
            updated_at: now,
        }
    }
}

impl_versioned!(User);

/// The tenant itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: EntityId,
    pub org: OrgId,
    pub name: String,
    pub version: u64,
    pub updated_at: WallClock,
}

impl Organization {
    pub fn new(id: EntityId, org: OrgId, name: impl Into<String>, now: WallClock) -> Self {
        Self {
            id,
            org,
            name: name.into(),
            version: 1,
            updated_at: now,
        }
    }
}

impl_versioned!(Organization);
