//! docmap protocol types.
//!
//! This crate defines the data exchanged between the docmap persistence core
//! and a document-database driver. Nothing here performs I/O.
//!
//! # Modules
//!
//! - [`document`] - Document representation and field access
//! - [`filter`] - Filter expressions and their evaluation
//! - [`update`] - Partial-update operators
//! - [`pipeline`] - Aggregation stages
//! - [`options`] - Find, session and transaction options
//! - [`write`] - Bulk write models
//! - [`result`] - Driver result types
//! - [`error`] - Protocol error types

pub mod document;
pub mod error;
pub mod filter;
pub mod options;
pub mod pipeline;
pub mod result;
pub mod update;
pub mod write;

pub use error::Error;

// Re-export commonly used types at crate root
pub use document::{Document, ID_FIELD};
pub use filter::Filter;
pub use options::{
    FindOptions, NamePattern, ReadConcern, SessionOptions, SortDirection, SortSpec,
    TransactionOptions,
};
pub use pipeline::Stage;
pub use result::{BulkWriteResult, DeleteResult, ReplaceOneResult, UpdateResult, WriteError};
pub use update::{Update, UpdateOp};
pub use write::WriteModel;

/// Re-export of the JSON value type documents are built from.
pub use serde_json::Value;
