//! Document-database driver boundary.
//!
//! The persistence core composes only the primitives declared here. A driver
//! owns connections, the wire protocol and cursor mechanics; the core owns
//! identity, hooks, cascades and transaction scoping.
//!
//! Every data operation takes an optional session. When a session is given
//! and a transaction is active on it, the operation must be staged under that
//! transaction until it commits.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use docmap_proto::{
    BulkWriteResult, DeleteResult, Document, Filter, FindOptions, NamePattern, SessionOptions,
    Stage, TransactionOptions, Update, UpdateResult, WriteModel,
};

use crate::error::StoreError;

/// Result type for driver operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A shared session handle.
pub type SessionHandle = Arc<dyn Session>;

/// Entry point of a driver.
#[async_trait]
pub trait Client: Send + Sync {
    /// Get a handle to a database. Databases are created lazily.
    fn database(&self, name: &str) -> Arc<dyn Database>;

    /// Start a new session.
    async fn start_session(&self, options: SessionOptions) -> StoreResult<SessionHandle>;
}

/// A named database.
#[async_trait]
pub trait Database: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Get a handle to a collection. Collections are created on first write.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    /// List collection names matching a pattern.
    ///
    /// Listing is not session-aware and cannot be cancelled.
    async fn list_collection_names(&self, pattern: &NamePattern) -> StoreResult<Vec<String>>;
}

/// A collection of documents.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Delete every document matching the filter.
    async fn delete_many(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> StoreResult<DeleteResult>;

    /// Replace the first document matching the filter.
    async fn replace_one(
        &self,
        filter: Filter,
        replacement: Document,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult>;

    /// Apply field operators to the first document matching the filter.
    async fn update_one(
        &self,
        filter: Filter,
        update: Update,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult>;

    /// Execute a batch of write models.
    ///
    /// Unordered batches apply every model and report per-item failures in
    /// [`BulkWriteResult::write_errors`]. Ordered batches stop at the first
    /// failure.
    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        ordered: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteResult>;

    /// Open a cursor over matching documents.
    async fn find(
        &self,
        filter: Filter,
        options: FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Box<dyn Cursor>>;

    /// Count matching documents.
    async fn count(&self, filter: Filter, session: Option<&SessionHandle>) -> StoreResult<u64>;

    /// Run an aggregation pipeline.
    async fn aggregate(
        &self,
        stages: Vec<Stage>,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>>;
}

/// A server-side cursor yielding documents in batches.
#[async_trait]
pub trait Cursor: Send {
    /// Fetch the next batch. `None` when the cursor is exhausted.
    async fn next_batch(&mut self) -> StoreResult<Option<Vec<Document>>>;
}

/// A logical session that can host one transaction at a time.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Session identifier.
    fn id(&self) -> &str;

    /// Begin a transaction on this session.
    fn start_transaction(&self, options: TransactionOptions) -> StoreResult<()>;

    /// Commit the active transaction.
    async fn commit_transaction(&self) -> StoreResult<()>;

    /// Abort the active transaction, discarding staged writes.
    async fn abort_transaction(&self) -> StoreResult<()>;

    /// Whether a transaction is active.
    fn in_transaction(&self) -> bool;

    /// Release the session. Any active transaction is discarded.
    fn end(&self);

    /// Access the concrete session type.
    fn as_any(&self) -> &dyn Any;
}

/// Drain a cursor into a vector.
pub async fn collect_cursor(mut cursor: Box<dyn Cursor>) -> StoreResult<Vec<Document>> {
    let mut documents = Vec::new();
    while let Some(batch) = cursor.next_batch().await? {
        documents.extend(batch);
    }
    Ok(documents)
}
