//! Offline-first synchronization and reconciliation engine.
//!
//! The engine keeps a durable local copy of organizational data
//! consistent with a remote authoritative backend under unreliable
//! connectivity, concurrent multi-client edits, and partial failures.
//!
//! Data flow: UI action → local store write (optimistic, synchronous)
//! → mutation queue enqueue → sync executor drains against the remote
//! → domain event bus notifies other clients → hydration pulls a full
//! snapshot and reconciles on reconnect or on coarse events.

#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hydrate;
pub mod persist;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod test_utils;

pub use bus::{EventBus, EventTransport, LoopbackTransport, NullTransport};
pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::EngineError;
pub use executor::{FlushOutcome, RetryPolicy, SyncExecutor};
pub use hydrate::{Hydrator, RemoteSnapshot};
pub use persist::{FsPersistence, MemPersistence, Persistence};
pub use queue::{MutationKey, MutationQueue, QueuedMutation, QueuedOp};
pub use remote::{RemoteApi, RemoteError};
pub use store::{LocalStore, SyncPending};

pub type Result<T> = std::result::Result<T, EngineError>;
