//! Domain errors for the tickrewards reconciliation engine.

use thiserror::Error;

/// Domain-level errors that can occur while reconciling and scoring tasks.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No access token, or the remote rejected it.
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by remote service: {0}")]
    RateLimited(String),

    #[error("Remote call timed out after {0}s")]
    Timeout(u64),

    /// A rule scope could not be evaluated (bad regex, malformed payload).
    #[error("Rule {rule_id} could not be evaluated: {reason}")]
    RuleEvaluation { rule_id: i64, reason: String },

    #[error("Rule not found: {0}")]
    RuleNotFound(i64),

    #[error("Tick cancelled during {0}")]
    Cancelled(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Errors raised by the remote collaborator that abort the whole tick.
    pub const fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired(_) | Self::Network(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
