//! In-memory sessions with staged transactional writes.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use docmap_proto::{Document, ReadConcern, SessionOptions, TransactionOptions};
use parking_lot::Mutex;
use tracing::debug;

use super::{Namespace, Store};
use crate::driver::{Session, StoreResult};
use crate::error::StoreError;

/// Uncommitted writes of one collection: identity to new document, or
/// `None` for a delete.
pub(crate) type Overlay = BTreeMap<String, Option<Document>>;

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) transaction: Option<TransactionOptions>,
    pub(crate) staged: BTreeMap<Namespace, Overlay>,
    pub(crate) ended: bool,
}

/// A session of the in-memory driver.
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    store: Arc<Store>,
    options: SessionOptions,
    pub(crate) state: Mutex<SessionState>,
}

impl MemorySession {
    pub(crate) fn new(id: String, store: Arc<Store>, options: SessionOptions) -> Self {
        Self {
            id,
            store,
            options,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Options the session was started with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Read concern of the active transaction.
    pub fn read_concern(&self) -> Option<ReadConcern> {
        self.state
            .lock()
            .transaction
            .as_ref()
            .and_then(|options| options.read_concern)
    }

    /// Whether the session has been released.
    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Number of staged writes across all collections.
    pub fn staged_writes(&self) -> usize {
        self.state.lock().staged.values().map(BTreeMap::len).sum()
    }

    pub(crate) fn belongs_to(&self, store: &Arc<Store>) -> bool {
        Arc::ptr_eq(&self.store, store)
    }

    fn ended_error(&self) -> StoreError {
        StoreError::new(
            StoreError::INVALID_SESSION,
            format!("session {} has ended", self.id),
        )
    }

    /// Take the staged writes and close the transaction.
    fn finish(&self) -> StoreResult<BTreeMap<Namespace, Overlay>> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(self.ended_error());
        }
        if state.transaction.take().is_none() {
            return Err(StoreError::new(
                StoreError::NO_TRANSACTION,
                format!("session {} has no active transaction", self.id),
            ));
        }
        Ok(std::mem::take(&mut state.staged))
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_transaction(&self, options: TransactionOptions) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.ended {
            return Err(self.ended_error());
        }
        if state.transaction.is_some() {
            return Err(StoreError::new(
                StoreError::TRANSACTION_IN_PROGRESS,
                format!("session {} already has an active transaction", self.id),
            ));
        }
        state.transaction = Some(options);
        state.staged.clear();
        Ok(())
    }

    async fn commit_transaction(&self) -> StoreResult<()> {
        let staged = self.finish()?;

        let mut data = self.store.data.write();
        let mut writes = 0usize;
        for (namespace, overlay) in staged {
            for (id, document) in overlay {
                writes += 1;
                match document {
                    Some(document) => {
                        data.entry(namespace.clone()).or_default().insert(id, document);
                    }
                    None => {
                        if let Some(documents) = data.get_mut(&namespace) {
                            documents.remove(&id);
                        }
                    }
                }
            }
        }
        debug!(session = %self.id, writes, "memory transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self) -> StoreResult<()> {
        let staged = self.finish()?;
        debug!(session = %self.id, collections = staged.len(), "memory transaction aborted");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    fn end(&self) {
        let mut state = self.state.lock();
        state.transaction = None;
        state.staged.clear();
        state.ended = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
