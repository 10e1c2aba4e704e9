//! Domain atoms for the pinboard sync engine.
//!
//! Module hierarchy follows type dependency order:
//! - time: wall-clock primitive
//! - identity: OrgId, EntityId, ActorId, ClientId
//! - domain: EntityKind, TaskStatus, Priority, ProjectState
//! - entity: Task, Project, User, Organization
//! - patch: Patch<T> and per-entity partial updates
//! - event: DomainEvent broadcast between clients

#![forbid(unsafe_code)]

pub mod domain;
pub mod entity;
pub mod error;
pub mod event;
pub mod identity;
pub mod patch;
pub mod time;

pub use domain::{EntityKind, Priority, ProjectState, TaskStatus};
pub use entity::{Comment, Organization, Project, Task, User, Versioned};
pub use error::{CoreError, InvalidId, Transience};
pub use event::{DomainEvent, EventKind};
pub use identity::{ActorId, ClientId, EntityId, OrgId};
pub use patch::{Patch, ProjectPatch, TaskPatch};
pub use time::WallClock;
