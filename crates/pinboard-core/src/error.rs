//! Core capability errors and retry classification.
//!
//! Core errors are bounded and stable: they represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Invalid identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("org id `{raw}` is invalid: {reason}")]
    Org { raw: String, reason: String },
    #[error("entity id `{raw}` is invalid: {reason}")]
    Entity { raw: String, reason: String },
    #[error("actor id `{raw}` is invalid: {reason}")]
    Actor { raw: String, reason: String },
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error("validation failed for field {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are all refusals of bad input.
        Transience::Permanent
    }
}
