//! Engine error taxonomy.

use thiserror::Error;

/// Typed errors surfaced at the engine boundary.
///
/// Matching-policy refusals (insufficient liquidity, unfillable FOK)
/// are not errors: they come back as a response with a terminal status
/// and a reject reason.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Schema or range violation, failed synchronously at entry
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown order or symbol
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate id, or an operation on an already-terminal order
    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine or a dependency is not accepting work
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Refused by risk or matching policy
    #[error("rejected: {0}")]
    Rejected(String),

    /// Worth retrying per the caller's policy
    #[error("transient: {0}")]
    Transient(String),

    /// Invariant violated; the operation was aborted
    #[error("internal: {0}")]
    Internal(String),
}
