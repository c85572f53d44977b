//! Error model for the authorization core.

use thiserror::Error;

/// Result type used by every core operation.
pub type AccessResult<T> = Result<T, AccessError>;

/// Failure of a core operation.
///
/// `Validation` is raised before any store access. `NotFound` and
/// `InvalidState` are surfaced verbatim and carry no side effects. `Store`
/// wraps a collaborator failure; it must never be folded into a "denied"
/// decision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Malformed input (unknown role, out-of-range duration, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The addressed grant or request does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request transition was attempted from a terminal state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The backing store failed or timed out.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True when the failure came from the store rather than from the caller.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Failure reported by a grant or request store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable (pool closed, connection refused, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A store call exceeded its deadline.
    #[error("store call timed out: {0}")]
    Timeout(String),

    /// The backend rejected the operation.
    #[error("store error: {0}")]
    Backend(String),

    /// A stored row could not be decoded into the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_and_stay_distinguishable() {
        let err: AccessError = StoreError::Timeout("list_active".into()).into();
        assert!(err.is_store());
        assert_eq!(err.to_string(), "store call timed out: list_active");
        assert!(!AccessError::not_found("grant").is_store());
    }
}
