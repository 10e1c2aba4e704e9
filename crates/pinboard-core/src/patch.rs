//! Three-way field patches for partial entity updates.
//!
//! The wire shape sends only changed top-level concerns, never a whole
//! entity. Queued patches for the same key coalesce field-by-field
//! with last-write-wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Priority, ProjectState, TaskStatus};
use super::entity::{Comment, Project, Task};
use super::error::CoreError;
use super::identity::ActorId;
use super::time::WallClock;

/// Three-way patch for updating a field.
///
/// The clean solution to the "Option<Option<T>>" problem for nullable
/// fields:
/// - `Keep` - Don't change the field
/// - `Clear` - Set the field to None
/// - `Set(T)` - Set the field to Some(T)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Patch<T> {
    /// Don't change the field.
    #[default]
    Keep,
    /// Clear the field (set to None).
    Clear,
    /// Set the field to a new value.
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Apply the patch to a current value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current,
            Patch::Clear => None,
            Patch::Set(v) => Some(v),
        }
    }

    /// Coalesce a later patch over this one (later wins unless Keep).
    pub fn merge(&mut self, later: Patch<T>) {
        if !later.is_keep() {
            *self = later;
        }
    }
}

// Custom serde: absent = Keep (via #[serde(default)]), null = Clear,
// value = Set. Keep must additionally be skipped on serialize.
impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
            Patch::Set(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let opt: Option<T> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(Patch::Clear),
            Some(v) => Ok(Patch::Set(v)),
        }
    }
}

/// Partial update for task fields.
///
/// `title` is required on the entity and may be updated but never
/// cleared; `validate` refuses `Clear`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub title: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub status: Patch<TaskStatus>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub priority: Patch<Priority>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub due_at: Patch<WallClock>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub assignees: Patch<Vec<ActorId>>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub tags: Patch<Vec<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub timer_started_at: Patch<WallClock>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub comments: Patch<Vec<Comment>>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub meta: Patch<BTreeMap<String, Value>>,
}

impl TaskPatch {
    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.title {
            Patch::Clear => Err(CoreError::ValidationFailed {
                field: "title".into(),
                reason: "cannot clear required field".into(),
            }),
            Patch::Set(t) if t.trim().is_empty() => Err(CoreError::ValidationFailed {
                field: "title".into(),
                reason: "title cannot be empty".into(),
            }),
            _ => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_keep()
            && self.status.is_keep()
            && self.priority.is_keep()
            && self.due_at.is_keep()
            && self.assignees.is_keep()
            && self.tags.is_keep()
            && self.timer_started_at.is_keep()
            && self.comments.is_keep()
            && self.meta.is_keep()
    }

    /// Apply to an entity in place. Caller bumps the version.
    pub fn apply_to(self, task: &mut Task) {
        if let Patch::Set(title) = self.title {
            task.title = title;
        }
        if let Patch::Set(status) = self.status {
            task.status = status;
        }
        if let Patch::Set(priority) = self.priority {
            task.priority = priority;
        }
        task.due_at = self.due_at.apply(task.due_at);
        if let Patch::Set(assignees) = self.assignees {
            task.assignees = assignees;
        }
        if let Patch::Set(tags) = self.tags {
            task.tags = tags;
        }
        task.timer_started_at = self.timer_started_at.apply(task.timer_started_at);
        if let Patch::Set(comments) = self.comments {
            task.comments = comments;
        }
        if let Patch::Set(meta) = self.meta {
            task.meta = meta;
        }
    }
}

/// Partial update for project fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub name: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub state: Patch<ProjectState>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub completion_requested_at: Patch<WallClock>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub completion_requested_by: Patch<ActorId>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub meta: Patch<BTreeMap<String, Value>>,
}

impl ProjectPatch {
    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.name {
            Patch::Clear => Err(CoreError::ValidationFailed {
                field: "name".into(),
                reason: "cannot clear required field".into(),
            }),
            Patch::Set(n) if n.trim().is_empty() => Err(CoreError::ValidationFailed {
                field: "name".into(),
                reason: "name cannot be empty".into(),
            }),
            _ => Ok(()),
        }
    }

    pub fn apply_to(self, project: &mut Project) {
        if let Patch::Set(name) = self.name {
            project.name = name;
        }
        if let Patch::Set(state) = self.state {
            project.state = state;
        }
        project.completion_requested_at = self
            .completion_requested_at
            .apply(project.completion_requested_at);
        project.completion_requested_by = self
            .completion_requested_by
            .apply(project.completion_requested_by.take());
        if let Patch::Set(meta) = self.meta {
            project.meta = meta;
        }
    }
}
