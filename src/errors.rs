//! Typed error hierarchy for the marketplace.
//!
//! The database layer returns `anyhow::Result`; domain failures are raised as
//! `MarketError` inside it so the HTTP boundary can recover them by downcast
//! and pick a status code.

use thiserror::Error;

/// Errors from marketplace operations.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("You must be logged in")]
    Unauthenticated,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MarketError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_not_found_carries_entity_and_id() {
        let err = MarketError::not_found("Project", 42);
        match &err {
            MarketError::NotFound { entity, id } => {
                assert_eq!(*entity, "Project");
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Project 42 not found");
    }

    #[test]
    fn test_survives_anyhow_round_trip_with_context() {
        let err: anyhow::Error = MarketError::conflict("Email taken").into();
        let err = Err::<(), _>(err).context("register").unwrap_err();
        let recovered = err.downcast_ref::<MarketError>();
        assert!(matches!(recovered, Some(MarketError::Conflict(msg)) if msg == "Email taken"));
    }

    #[test]
    fn test_implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&MarketError::LockPoisoned);
        assert_std_error(&MarketError::Unauthenticated);
    }
}
