//! Engine-level convenience error.
//!
//! Not a "god error": a thin wrapper over canonical capability errors,
//! plus the couple of refusal states owned by the engine boundary
//! itself.

use thiserror::Error;

use pinboard_core::{CoreError, EntityId, Transience};

use crate::persist::PersistError;
use crate::remote::RemoteError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("entity not found locally: {0}")]
    NotFound(EntityId),
}

impl EngineError {
    pub fn transience(&self) -> Transience {
        match self {
            EngineError::Core(e) => e.transience(),
            EngineError::Persist(e) => e.transience(),
            EngineError::Remote(e) => e.transience(),
            EngineError::NotFound(_) => Transience::Permanent,
        }
    }
}
