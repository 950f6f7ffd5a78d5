//! Error types for the fee portal core
//!
//! Domain failures (`DuplicateEmail`, `NotFound`, `NoSession`) are recovered
//! by the [`AuthService`](crate::AuthService) boolean operations. Everything
//! else is a real failure and is propagated to the caller.

use thiserror::Error;

/// Result type alias for fee portal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the fee portal
#[derive(Error, Debug)]
pub enum Error {
    /// Another record already uses this email
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    /// No record with the given id
    #[error("Student not found: {0}")]
    NotFound(String),

    /// No record matches the given email and password
    #[error("Invalid credentials for {0}")]
    InvalidCredentials(String),

    /// The operation requires an authenticated session
    #[error("No active session")]
    NoSession,

    /// Durable storage failed to read or write a slot
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O errors from the storage backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a duplicate email error
    pub fn duplicate_email(email: impl Into<String>) -> Self {
        Self::DuplicateEmail(email.into())
    }

    /// Create a "not found" error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this is a domain failure the operation surface reports as `false`
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEmail(_)
                | Self::NotFound(_)
                | Self::InvalidCredentials(_)
                | Self::NoSession
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
