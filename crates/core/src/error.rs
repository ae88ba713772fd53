//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Why a write was refused because of the current state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The requested transition is not in the document type's table.
    IllegalTransition,
    /// The document already reached the state the caller asked for (e.g. converted).
    AlreadyProcessed,
    /// Optimistic concurrency mismatch: someone else wrote first.
    StaleWrite,
}

impl core::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ConflictKind::IllegalTransition => "illegal transition",
            ConflictKind::AlreadyProcessed => "already processed",
            ConflictKind::StaleWrite => "stale write",
        };
        f.write_str(s)
    }
}

/// Domain-level error.
///
/// Every engine operation reports one of these kinds so the presentation layer
/// can show a specific message and decide whether a retry makes sense.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed validation (non-positive amount, missing field, empty items).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request conflicts with the current stored state.
    #[error("{kind}: {message}")]
    ConflictingState { kind: ConflictKind, message: String },

    /// A referenced party, document, invoice or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage collaborator was unavailable or aborted the transaction.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Stored data violates a domain invariant (e.g. a broken running-balance chain).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn illegal_transition(msg: impl Into<String>) -> Self {
        Self::ConflictingState {
            kind: ConflictKind::IllegalTransition,
            message: msg.into(),
        }
    }

    pub fn already_processed(msg: impl Into<String>) -> Self {
        Self::ConflictingState {
            kind: ConflictKind::AlreadyProcessed,
            message: msg.into(),
        }
    }

    pub fn stale(msg: impl Into<String>) -> Self {
        Self::ConflictingState {
            kind: ConflictKind::StaleWrite,
            message: msg.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Only transient storage failures and lost optimistic races qualify; an
    /// illegal transition or a validation failure fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::Persistence(_)
                | DomainError::ConflictingState {
                    kind: ConflictKind::StaleWrite,
                    ..
                }
        )
    }
}
