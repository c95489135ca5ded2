//! Engine error types.
//!
//! These errors represent contract violations by the caller (bad session
//! parameters, writes to a finished session) and failures at the persistence
//! boundary. Numerical edge cases are never errors: they resolve to defined
//! fallbacks inside the estimator and selector.

use thiserror::Error;

use crate::model::TerminationReason;

/// Errors raised by the adaptive testing engine.
#[derive(Debug, Error)]
pub enum CatError {
    /// `max_items` must be at least one.
    #[error("max_items must be greater than zero")]
    InvalidMaxItems,

    /// `target_se` must be a positive, finite number.
    #[error("target_se must be positive and finite, got {0}")]
    InvalidTargetSe(f64),

    /// The initial ability estimate must be finite.
    #[error("initial theta must be finite, got {0}")]
    InvalidInitialTheta(f64),

    /// Estimator settings are inconsistent.
    #[error("invalid estimator settings: {0}")]
    InvalidEstimator(String),

    /// The session has already been terminated.
    #[error("session {session_id} is terminated ({reason})")]
    SessionTerminated {
        session_id: String,
        reason: TerminationReason,
    },

    /// The item's parameters cannot be used even after clamping.
    #[error("item {item_id} has unusable parameters: {reason}")]
    InvalidItem { item_id: String, reason: String },

    /// The item was already administered in this session.
    #[error("item {0} was already administered in this session")]
    DuplicateItem(String),

    /// A serialized session failed validation.
    #[error("invalid serialized session: {0}")]
    InvalidSession(String),

    /// The serialized session could not be decoded.
    #[error("failed to decode session: {0}")]
    Decode(#[from] serde_json::Error),

    /// No session exists under the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Another writer saved the session since it was loaded.
    #[error("version conflict for session {session_id}: expected {expected:?}, found {found:?}")]
    VersionConflict {
        session_id: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// The session store failed.
    #[error("session store error: {0}")]
    Store(String),

    /// The item bank does not know the item.
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// The item bank failed.
    #[error("item bank error: {0}")]
    ItemBank(String),
}

impl CatError {
    /// Returns `true` if retrying the same load → mutate → save cycle may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatError::VersionConflict { .. } | CatError::Store(_) | CatError::ItemBank(_)
        )
    }
}
