//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be converted into a document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A document could not be converted into a typed value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A serialized entity was not a JSON object.
    #[error("expected a document, got {0}")]
    NotADocument(&'static str),

    /// An aggregation stage or update operator was malformed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
