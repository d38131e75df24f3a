//! Error types for Masque

use serde::Serialize;
use thiserror::Error;

/// Main error type for Masque operations
#[derive(Error, Debug)]
pub enum MasqueError {
    /// Entropy or key failure. Fatal to the operation, never degraded.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Missing, malformed, expired or revoked anonymous session token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller does not own the persona or post
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Owner is not a verified professional user
    #[error("User is not verified")]
    NotVerified,

    /// Owner already holds the maximum number of active personas
    #[error("Persona quota exceeded (limit {limit})")]
    QuotaExceeded { limit: usize },

    /// Persona or post not found (also used for expired and removed content)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Content hash or signature did not match on read
    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded operation did not finish in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using MasqueError
pub type MasqueResult<T> = Result<T, MasqueError>;

/// Client-safe rendering of an error.
///
/// Messages never reveal whether a persona exists versus is owned by
/// someone else, and internal failures carry no detail at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicError {
    /// HTTP-style status code
    pub status: u16,
    /// Stable machine-readable code
    pub code: &'static str,
    /// Human-readable message
    pub message: &'static str,
}

impl MasqueError {
    /// Map to the response a client is allowed to see.
    pub fn to_public(&self) -> PublicError {
        match self {
            Self::Authentication(_) => PublicError {
                status: 401,
                code: "authentication_required",
                message: "Authentication required",
            },
            Self::NotAuthorized(_) | Self::NotFound(_) => PublicError {
                status: 404,
                code: "not_found",
                message: "Resource not found",
            },
            Self::NotVerified => PublicError {
                status: 403,
                code: "not_verified",
                message: "A verified professional account is required",
            },
            Self::QuotaExceeded { .. } => PublicError {
                status: 409,
                code: "quota_exceeded",
                message: "Persona limit reached",
            },
            Self::Validation(_) => PublicError {
                status: 400,
                code: "validation_error",
                message: "Invalid request",
            },
            _ => PublicError {
                status: 500,
                code: "internal_error",
                message: "Request could not be completed",
            },
        }
    }

    /// Whether the error is an internal failure that should be logged
    /// rather than explained to the caller.
    pub fn is_internal(&self) -> bool {
        self.to_public().status >= 500
    }
}
