//! In-memory reference driver.
//!
//! Implements the driver boundary over locked ordered maps. Writes without a
//! transaction apply immediately. Writes inside a session's transaction are
//! staged in a per-session overlay that reads of the same session see;
//! commit applies the overlay under one write lock, abort discards it.

mod collection;
mod cursor;
mod session;

pub use collection::MemoryCollection;
pub use cursor::MemoryCursor;
pub use session::MemorySession;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docmap_proto::{Document, NamePattern, SessionOptions};
use parking_lot::RwLock;
use tracing::debug;

use crate::driver::{Client, Collection, Database, SessionHandle, StoreResult};

/// `(database, collection)`.
pub(crate) type Namespace = (String, String);

/// Documents of one collection keyed by identity.
pub(crate) type Documents = BTreeMap<String, Document>;

/// State shared by every handle of one client.
#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) data: RwLock<BTreeMap<Namespace, Documents>>,
    next_session: AtomicU64,
}

/// In-memory driver client.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    store: Arc<Store>,
}

impl MemoryClient {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed documents of a collection, ordered by identity.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.store
            .data
            .read()
            .get(&(database.to_string(), collection.to_string()))
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the collections that exist in a database.
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.store
            .data
            .read()
            .keys()
            .filter(|(db, _)| db == database)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl Client for MemoryClient {
    fn database(&self, name: &str) -> Arc<dyn Database> {
        Arc::new(MemoryDatabase {
            store: self.store.clone(),
            name: name.to_string(),
        })
    }

    async fn start_session(&self, options: SessionOptions) -> StoreResult<SessionHandle> {
        let number = self.store.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("memory-session-{}", number);
        debug!(session = %id, "session started");
        Ok(Arc::new(MemorySession::new(id, self.store.clone(), options)))
    }
}

/// In-memory database handle.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    store: Arc<Store>,
    name: String,
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection::new(
            self.store.clone(),
            (self.name.clone(), name.to_string()),
        ))
    }

    async fn list_collection_names(&self, pattern: &NamePattern) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .data
            .read()
            .keys()
            .filter(|(db, name)| *db == self.name && pattern.matches(name))
            .map(|(_, name)| name.clone())
            .collect())
    }
}
