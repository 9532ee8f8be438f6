//! Errors raised by the pure lifecycle code.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Business rule failure. Storage errors never end up here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Totals, quantities or custody no longer add up.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Status change absent from the transition table.
    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_renders_both_states() {
        let err = DomainError::invalid_transition("completed", "draft");
        assert_eq!(
            err.to_string(),
            "invalid transition from 'completed' to 'draft'"
        );
    }
}
