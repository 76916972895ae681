//! Error types for the persistence core.

use thiserror::Error;

/// Persistence core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Misdeclared hook or conflicting field annotations.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid call arguments, such as an empty or nested field list.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Operation is not supported in the requested mode.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Transaction context misuse (operation after commit or abort).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Transport or server failure reported by the driver.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Proto(#[from] docmap_proto::Error),

    /// JSON conversion error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failure reported by a document-database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct StoreError {
    /// Driver-specific error code.
    pub code: i32,
    /// Error message.
    pub message: String,
}

impl StoreError {
    /// Generic failure code.
    pub const INTERNAL: i32 = 1;
    /// The session was used after it ended or with the wrong client.
    pub const INVALID_SESSION: i32 = 2;
    /// Commit or abort was issued without an active transaction.
    pub const NO_TRANSACTION: i32 = 251;
    /// A transaction was started while another is active.
    pub const TRANSACTION_IN_PROGRESS: i32 = 256;
    /// A write tried to change a document's identity.
    pub const IMMUTABLE_FIELD: i32 = 66;

    /// Create a store error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a store error with the generic failure code.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }
}

/// Result type for persistence core operations.
pub type Result<T> = std::result::Result<T, Error>;
