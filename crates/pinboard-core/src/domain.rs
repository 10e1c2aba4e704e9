//! Domain enums: entity kinds, task workflow, project lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which collection an entity belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Project,
    User,
    Organization,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::User => "user",
            EntityKind::Organization => "organization",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone)]
#[error("unknown entity kind `{raw}`")]
pub struct UnknownEntityKind {
    pub raw: String,
}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "task" => Ok(EntityKind::Task),
            "project" => Ok(EntityKind::Project),
            "user" => Ok(EntityKind::User),
            "organization" => Ok(EntityKind::Organization),
            _ => Err(UnknownEntityKind { raw: raw.into() }),
        }
    }
}

/// Task workflow status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

/// Task priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Project lifecycle state.
///
/// Terminal states (archived/completed/deleted) are authoritative on
/// the remote side: hydration never lets a local copy override them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    #[default]
    Active,
    Archived,
    Completed,
    Deleted,
}

impl ProjectState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProjectState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trips() {
        for kind in [
            EntityKind::Task,
            EntityKind::Project,
            EntityKind::User,
            EntityKind::Organization,
        ] {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("board".parse::<EntityKind>().is_err());
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!ProjectState::Active.is_terminal());
        assert!(ProjectState::Archived.is_terminal());
        assert!(ProjectState::Completed.is_terminal());
        assert!(ProjectState::Deleted.is_terminal());
    }
}
