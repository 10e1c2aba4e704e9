//! Durable, coalescing queue of pending mutations.
//!
//! At most one entry exists per (org, kind, id) key. New mutations
//! coalesce into the existing entry instead of appending:
//!
//! - Update over queued Create merges the patch into the Create
//!   payload - the remote call stays a single Create with the latest
//!   field values.
//! - Update over queued Update merges field-by-field, last write wins.
//! - Delete over queued Create cancels both: the entity never left
//!   this client, so no remote call is owed.
//! - Delete over queued Update replaces it with a Delete.
//! - Create/Update over a queued Delete is dropped - the delete in
//!   flight wins. Flagged at warn pending product confirmation of the
//!   delete-then-recreate flow.
//!
//! The queue persists after every mutating call so a crash or restart
//! resumes with the same pending set.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pinboard_core::{EntityId, EntityKind, OrgId, WallClock};

use crate::persist::{PersistError, Persistence};

const QUEUE_KEY: &str = "queue.json";

/// Coalescing key: one pending entry per entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationKey {
    pub org: OrgId,
    pub kind: EntityKind,
    pub id: EntityId,
}

impl MutationKey {
    pub fn new(org: OrgId, kind: EntityKind, id: EntityId) -> Self {
        Self { org, kind, id }
    }
}

/// The remote call a queued entry will issue.
///
/// Create carries a full entity payload; Update carries a partial
/// patch whose top-level nulls are clear markers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueuedOp {
    Create { payload: Value },
    Update { patch: Value },
    Delete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub key: MutationKey,
    #[serde(flatten)]
    pub op: QueuedOp,
    pub enqueued_at: WallClock,
}

pub struct MutationQueue {
    entries: Vec<QueuedMutation>,
    persist: Arc<dyn Persistence>,
}

impl MutationQueue {
    pub fn open(persist: Arc<dyn Persistence>) -> Result<Self, PersistError> {
        let entries = match persist.load(QUEUE_KEY)? {
            None => Vec::new(),
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    return Err(PersistError::Corrupt {
                        key: QUEUE_KEY.into(),
                        reason: err.to_string(),
                    });
                }
            },
        };
        Ok(Self { entries, persist })
    }

    pub fn enqueue_create(
        &mut self,
        key: MutationKey,
        payload: Value,
        now: WallClock,
    ) -> Result<(), PersistError> {
        match self.position(&key) {
            Some(idx) => match &self.entries[idx].op {
                QueuedOp::Delete => {
                    // Delete in flight wins; see module docs.
                    tracing::warn!(%key.org, %key.id, "create dropped: delete already queued");
                    return Ok(());
                }
                QueuedOp::Create { .. } | QueuedOp::Update { .. } => {
                    // Not a legal caller sequence; take the fresh payload.
                    tracing::warn!(%key.org, %key.id, "create over queued entry replaces it");
                    self.entries[idx].op = QueuedOp::Create { payload };
                    self.entries[idx].enqueued_at = now;
                }
            },
            None => self.entries.push(QueuedMutation {
                key,
                op: QueuedOp::Create { payload },
                enqueued_at: now,
            }),
        }
        self.save()
    }

    pub fn enqueue_update(
        &mut self,
        key: MutationKey,
        patch: Value,
        now: WallClock,
    ) -> Result<(), PersistError> {
        match self.position(&key) {
            Some(idx) => match &mut self.entries[idx].op {
                QueuedOp::Delete => {
                    tracing::warn!(%key.org, %key.id, "update dropped: delete already queued");
                    return Ok(());
                }
                QueuedOp::Create { payload } => {
                    // The remote call stays one Create with latest values.
                    shallow_merge(payload, patch);
                }
                QueuedOp::Update { patch: existing } => {
                    shallow_merge(existing, patch);
                }
            },
            None => self.entries.push(QueuedMutation {
                key,
                op: QueuedOp::Update { patch },
                enqueued_at: now,
            }),
        }
        self.save()
    }

    pub fn enqueue_delete(&mut self, key: MutationKey, now: WallClock) -> Result<(), PersistError> {
        match self.position(&key) {
            Some(idx) => match &self.entries[idx].op {
                QueuedOp::Create { .. } => {
                    // Never reached the remote: cancel both sides.
                    tracing::debug!(%key.org, %key.id, "delete cancels unsynced create");
                    self.entries.remove(idx);
                }
                QueuedOp::Update { .. } => {
                    self.entries[idx].op = QueuedOp::Delete;
                    self.entries[idx].enqueued_at = now;
                }
                QueuedOp::Delete => {}
            },
            None => self.entries.push(QueuedMutation {
                key,
                op: QueuedOp::Delete,
                enqueued_at: now,
            }),
        }
        self.save()
    }

    /// Pending mutations in FIFO order, optionally scoped to one org.
    pub fn drain(&self, org: Option<&OrgId>) -> Vec<QueuedMutation> {
        self.entries
            .iter()
            .filter(|e| org.is_none_or(|org| &e.key.org == org))
            .cloned()
            .collect()
    }

    /// Remove `sent` only if the queued entry is still identical to it.
    ///
    /// A mutation that coalesced into the entry while `sent` was in
    /// flight produced newer content the remote has not seen; that
    /// entry stays queued. Returns whether the removal happened.
    pub fn remove_if_unchanged(&mut self, sent: &QueuedMutation) -> Result<bool, PersistError> {
        match self.entries.iter().position(|e| e == sent) {
            Some(idx) => {
                self.entries.remove(idx);
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Entity ids of one org/kind with a queued Create or Update.
    ///
    /// Hydration retains these locally: the remote has not
    /// acknowledged them yet, so a snapshot may legitimately lack them.
    pub fn pending_upserts(&self, org: &OrgId, kind: EntityKind) -> BTreeSet<EntityId> {
        self.entries
            .iter()
            .filter(|e| &e.key.org == org && e.key.kind == kind)
            .filter(|e| !matches!(e.op, QueuedOp::Delete))
            .map(|e| e.key.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_for(&self, org: &OrgId) -> usize {
        self.entries.iter().filter(|e| &e.key.org == org).count()
    }

    fn position(&self, key: &MutationKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    fn save(&self) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec(&self.entries).map_err(|err| PersistError::Corrupt {
            key: QUEUE_KEY.into(),
            reason: err.to_string(),
        })?;
        self.persist.save(QUEUE_KEY, &bytes)
    }
}

/// Merge `patch` into `base` one top-level field at a time.
///
/// Nulls are clear markers and must survive the merge; non-object
/// patches replace the base outright.
fn shallow_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (field, value) in patch {
                base.insert(field, value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemPersistence;
    use serde_json::json;

    fn key(id: &str) -> MutationKey {
        MutationKey::new(
            OrgId::new("acme").unwrap(),
            EntityKind::Task,
            EntityId::new(id).unwrap(),
        )
    }

    fn open(persist: Arc<dyn Persistence>) -> MutationQueue {
        MutationQueue::open(persist).unwrap()
    }

    #[test]
    fn at_most_one_entry_per_key() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        q.enqueue_update(key("t1"), json!({"status": "done"}), WallClock(2))
            .unwrap();
        q.enqueue_update(key("t1"), json!({"title": "b"}), WallClock(3))
            .unwrap();

        assert_eq!(q.len(), 1);
        let drained = q.drain(None);
        assert_eq!(
            drained[0].op,
            QueuedOp::Update {
                patch: json!({"title": "b", "status": "done"})
            }
        );
    }

    #[test]
    fn update_merges_into_queued_create() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_create(key("t1"), json!({"title": "a", "priority": "low"}), WallClock(1))
            .unwrap();
        q.enqueue_update(key("t1"), json!({"priority": "high", "due_at": null}), WallClock(2))
            .unwrap();

        let drained = q.drain(None);
        assert_eq!(drained.len(), 1);
        assert_eq!(
            drained[0].op,
            QueuedOp::Create {
                payload: json!({"title": "a", "priority": "high", "due_at": null})
            }
        );
    }

    #[test]
    fn create_then_delete_cancels_both() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_create(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        q.enqueue_delete(key("t1"), WallClock(2)).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn delete_replaces_queued_update() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        q.enqueue_delete(key("t1"), WallClock(2)).unwrap();

        let drained = q.drain(None);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].op, QueuedOp::Delete);
    }

    #[test]
    fn queued_delete_wins_over_later_enqueues() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_delete(key("t1"), WallClock(1)).unwrap();
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(2))
            .unwrap();
        q.enqueue_create(key("t1"), json!({"title": "b"}), WallClock(3))
            .unwrap();

        let drained = q.drain(None);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].op, QueuedOp::Delete);
    }

    #[test]
    fn fifo_order_across_keys_is_preserved() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        q.enqueue_update(key("t2"), json!({"title": "b"}), WallClock(2))
            .unwrap();
        // Coalescing into t1 must not move it behind t2.
        q.enqueue_update(key("t1"), json!({"status": "done"}), WallClock(3))
            .unwrap();

        let drained = q.drain(None);
        assert_eq!(drained[0].key, key("t1"));
        assert_eq!(drained[1].key, key("t2"));
    }

    #[test]
    fn drain_filters_by_org() {
        let mut q = open(Arc::new(MemPersistence::new()));
        let other = MutationKey::new(
            OrgId::new("globex").unwrap(),
            EntityKind::Task,
            EntityId::new("t9").unwrap(),
        );
        q.enqueue_delete(key("t1"), WallClock(1)).unwrap();
        q.enqueue_delete(other.clone(), WallClock(2)).unwrap();

        let acme = OrgId::new("acme").unwrap();
        assert_eq!(q.drain(Some(&acme)).len(), 1);
        assert_eq!(q.pending_for(&acme), 1);
        assert_eq!(q.drain(None).len(), 2);
    }

    #[test]
    fn queue_survives_reopen() {
        let persist: Arc<dyn Persistence> = Arc::new(MemPersistence::new());
        let mut q = open(persist.clone());
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        drop(q);

        let q = open(persist);
        assert_eq!(q.len(), 1);
        assert_eq!(q.drain(None)[0].key, key("t1"));
    }

    #[test]
    fn remove_if_unchanged_keeps_coalesced_entry() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_update(key("t1"), json!({"title": "a"}), WallClock(1))
            .unwrap();
        let sent = q.drain(None).into_iter().next().unwrap();

        // A newer edit lands while `sent` is in flight.
        q.enqueue_update(key("t1"), json!({"title": "b"}), WallClock(2))
            .unwrap();
        assert!(!q.remove_if_unchanged(&sent).unwrap());
        assert_eq!(q.len(), 1);

        let fresh = q.drain(None).into_iter().next().unwrap();
        assert!(q.remove_if_unchanged(&fresh).unwrap());
        assert!(q.is_empty());
    }

    #[test]
    fn pending_upserts_skips_deletes_and_other_kinds() {
        let mut q = open(Arc::new(MemPersistence::new()));
        let project = |id: &str| {
            MutationKey::new(
                OrgId::new("acme").unwrap(),
                EntityKind::Project,
                EntityId::new(id).unwrap(),
            )
        };
        q.enqueue_create(project("p1"), json!({"name": "a"}), WallClock(1))
            .unwrap();
        q.enqueue_update(project("p2"), json!({"name": "b"}), WallClock(2))
            .unwrap();
        q.enqueue_delete(project("p3"), WallClock(3)).unwrap();
        q.enqueue_create(key("t1"), json!({"title": "c"}), WallClock(4))
            .unwrap();

        let acme = OrgId::new("acme").unwrap();
        let ids = q.pending_upserts(&acme, EntityKind::Project);
        assert!(ids.contains(&EntityId::new("p1").unwrap()));
        assert!(ids.contains(&EntityId::new("p2").unwrap()));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn removing_an_already_gone_entry_is_harmless() {
        let mut q = open(Arc::new(MemPersistence::new()));
        q.enqueue_delete(key("t1"), WallClock(1)).unwrap();
        let sent = q.drain(None).into_iter().next().unwrap();
        assert!(q.remove_if_unchanged(&sent).unwrap());
        assert!(!q.remove_if_unchanged(&sent).unwrap());
        assert!(q.is_empty());
    }
}
