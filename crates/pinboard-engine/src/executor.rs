//! Sync executor - drains the mutation queue against the remote.
//!
//! One flush pass walks a FIFO snapshot of the queue and classifies
//! each outcome:
//!
//! - success (and not-found on delete): entry removed
//! - transient: bounded retries with backoff, then the pass stops so
//!   no later entry can overtake a failed predecessor
//! - auth: the whole pass aborts; callers surface "reconnect required"
//! - permission (and not-found on create/update): the entry can never
//!   succeed, so it is dropped and the pass continues
//!
//! Remote calls and backoff sleeps run with the queue unlocked, so
//! local mutations keep landing mid-pass. Confirmed entries are
//! removed under a brief lock, skipping any entry a mutation coalesced
//! into while its older content was in flight.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pinboard_core::OrgId;

use crate::persist::Persistence;
use crate::queue::{MutationKey, MutationQueue, QueuedMutation, QueuedOp};
use crate::remote::{RemoteApi, RemoteError};
use crate::store::SyncPending;

/// Bounded retry with linear backoff (base delay × attempt number).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.base_delay * attempt).min(self.max_delay)
    }
}

/// Result of one flush pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Entries confirmed by the remote (or already consistent).
    pub flushed: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
    /// Entries dropped as terminally rejected; local state is stale
    /// for these and a hydration should follow.
    pub rejected: Vec<MutationKey>,
    /// Credentials were refused; the pipeline is paused.
    pub auth_required: bool,
}

type SleepFn = dyn Fn(Duration) + Send + Sync;

pub struct SyncExecutor {
    remote: Arc<dyn RemoteApi>,
    retry: RetryPolicy,
    sleep: Box<SleepFn>,
}

impl SyncExecutor {
    pub fn new(remote: Arc<dyn RemoteApi>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            retry,
            sleep: Box::new(|d| std::thread::sleep(d)),
        }
    }

    /// Replace the inter-retry sleep (tests use a no-op).
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Drain the queue against the remote, optionally scoped to one org.
    ///
    /// The queue lock is taken only to snapshot the pass and to remove
    /// confirmed entries; the remote calls and any backoff sleeps run
    /// unlocked. The pending flag clears only when the whole queue is
    /// empty after the pass.
    pub fn flush(
        &self,
        queue: &Mutex<MutationQueue>,
        pending: &Mutex<SyncPending>,
        persist: &dyn Persistence,
        org: Option<&OrgId>,
    ) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        let entries = self.lock_queue(queue).drain(org);

        'entries: for entry in entries {
            let mut attempt = 1u32;
            loop {
                let result = match &entry.op {
                    QueuedOp::Create { payload } => self.remote.create(&entry.key, payload),
                    QueuedOp::Update { patch } => self.remote.update(&entry.key, patch),
                    QueuedOp::Delete => self.remote.delete(&entry.key),
                };

                match result {
                    Ok(()) => {
                        self.confirm(queue, &entry);
                        outcome.flushed += 1;
                        break;
                    }
                    Err(RemoteError::NotFound) if matches!(entry.op, QueuedOp::Delete) => {
                        // Remote is already consistent with local intent.
                        tracing::debug!(%entry.key.id, "delete target already gone remotely");
                        self.confirm(queue, &entry);
                        outcome.flushed += 1;
                        break;
                    }
                    Err(RemoteError::Transient { reason }) => {
                        if attempt >= self.retry.max_attempts {
                            tracing::warn!(
                                %entry.key.id,
                                attempts = attempt,
                                "transient failures exhausted retries, stopping pass: {reason}"
                            );
                            // Entry stays queued; later entries must not
                            // overtake it.
                            break 'entries;
                        }
                        (self.sleep)(self.retry.delay_for(attempt));
                        attempt += 1;
                    }
                    Err(RemoteError::Auth) => {
                        tracing::warn!("authentication rejected, pausing flush pipeline");
                        outcome.auth_required = true;
                        break 'entries;
                    }
                    Err(err @ (RemoteError::Permission { .. } | RemoteError::NotFound)) => {
                        // Terminal for this one entry; keep going.
                        tracing::warn!(%entry.key.id, "mutation rejected by backend: {err}");
                        self.confirm(queue, &entry);
                        outcome.rejected.push(entry.key.clone());
                        break;
                    }
                }
            }
        }

        let queue = self.lock_queue(queue);
        outcome.remaining = match org {
            Some(org) => queue.pending_for(org),
            None => queue.len(),
        };

        // The flag is process-wide: it clears only once nothing at all
        // is pending, even when the pass was scoped to one org.
        if queue.is_empty() && !outcome.auth_required {
            let mut pending = pending.lock().expect("pending lock poisoned");
            if let Err(err) = pending.clear(persist) {
                tracing::error!("failed to persist cleared sync flag: {err}");
            }
        }

        outcome
    }

    /// Remove the entry the remote just settled, unless a mutation
    /// coalesced newer content into it while the call was in flight.
    fn confirm(&self, queue: &Mutex<MutationQueue>, sent: &QueuedMutation) {
        match self.lock_queue(queue).remove_if_unchanged(sent) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%sent.key.id, "entry coalesced mid-flight, keeping for next pass");
            }
            Err(err) => {
                tracing::error!(%sent.key.id, "failed to persist queue removal: {err}");
            }
        }
    }

    fn lock_queue<'a>(&self, queue: &'a Mutex<MutationQueue>) -> MutexGuard<'a, MutationQueue> {
        queue.lock().expect("queue lock poisoned")
    }
}
