//! Error types for the membership crate

/// Convenience alias used throughout the crate
pub type ClubResult<T> = Result<T, ClubError>;

/// Errors produced by membership, pricing and payment operations
#[derive(Debug, thiserror::Error)]
pub enum ClubError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    /// Bad input from an admin or a user; no state was changed and the
    /// caller may retry with corrected input.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(i64),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Payment not found: {0}")]
    PaymentNotFound(i64),
}

impl From<sqlx::Error> for ClubError {
    fn from(err: sqlx::Error) -> Self {
        ClubError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for ClubError {
    fn from(err: reqwest::Error) -> Self {
        ClubError::Provider(err.to_string())
    }
}
