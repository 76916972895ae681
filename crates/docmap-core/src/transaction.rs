//! Transaction context.
//!
//! A [`Transaction`] owns one session with an active transaction and exposes
//! the save, delete and read surface of [`Db`] bound to that session. Writes
//! are staged until [`Transaction::commit`]; [`Transaction::abort`] discards
//! them. The session is released exactly once when the context is dropped,
//! whichever way it finished.

use std::future::Future;

use docmap_proto::{
    BulkWriteResult, DeleteResult, Document, Filter, FindOptions, ReplaceOneResult, Stage,
    TransactionOptions, UpdateResult,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::db::Db;
use crate::delete::with_cancellation;
use crate::driver::SessionHandle;
use crate::entity::Entity;
use crate::error::{Error, Result};

/// Lifecycle state of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Committed; no further operations are accepted.
    Committed,
    /// Aborted; no further operations are accepted.
    Aborted,
}

type CommitCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A unit of work bound to one session and transaction.
pub struct Transaction {
    db: Db,
    session: SessionHandle,
    state: TransactionState,
    on_committed: Mutex<Vec<CommitCallback>>,
}

impl Transaction {
    /// Start a session and begin a transaction on it.
    ///
    /// When `options.database` is set, entity types without an explicit
    /// binding resolve to that database for the life of the transaction.
    /// Without a read concern the `Db`'s configured one is used.
    pub async fn begin(db: &Db, mut options: TransactionOptions) -> Result<Self> {
        let db = match &options.database {
            Some(database) => db.scoped_to(database.clone()),
            None => db.clone(),
        };
        if options.read_concern.is_none() {
            options.read_concern = Some(db.config().read_concern);
        }

        let session = db.client().start_session(options.session.clone()).await?;
        if let Err(e) = session.start_transaction(options.clone()) {
            session.end();
            return Err(e.into());
        }

        info!(
            session = session.id(),
            database = %db.config().default_database,
            read_concern = ?options.read_concern,
            "transaction started"
        );
        Ok(Self {
            db,
            session,
            state: TransactionState::Active,
            on_committed: Mutex::new(Vec::new()),
        })
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The bound session, for driver-level calls and relationship helpers.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// The `Db` operations are routed through.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Bind an entity to this transaction's session.
    ///
    /// Returns false if the entity type has no session slot.
    pub fn attach<T: Entity>(&self, entity: &mut T) -> bool {
        entity.attach_session(&self.session)
    }

    /// Bind a batch of entities to this transaction's session.
    ///
    /// Returns how many entities were bound.
    pub fn attach_many<T: Entity>(&self, entities: &mut [T]) -> usize {
        entities
            .iter_mut()
            .map(|entity| entity.attach_session(&self.session))
            .filter(|bound| *bound)
            .count()
    }

    /// Run `callback` after a successful commit.
    ///
    /// Callbacks run in registration order once the commit is durable. They
    /// never run on abort.
    pub fn on_committed<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_committed
            .lock()
            .push(Box::new(move || callback().boxed()));
    }

    /// Commit staged writes, then run the commit callbacks.
    pub async fn commit(&mut self, cancel: Option<&Cancellation>) -> Result<()> {
        self.ensure_active()?;
        let session = self.session.clone();
        with_cancellation(cancel, async move {
            session.commit_transaction().await.map_err(Error::from)
        })
        .await?;

        self.state = TransactionState::Committed;
        info!(session = self.session.id(), "transaction committed");

        let callbacks = std::mem::take(&mut *self.on_committed.lock());
        if !callbacks.is_empty() {
            debug!(
                session = self.session.id(),
                callbacks = callbacks.len(),
                "running commit callbacks"
            );
        }
        for callback in callbacks {
            callback().await;
        }
        Ok(())
    }

    /// Discard staged writes. Commit callbacks are dropped unrun.
    pub async fn abort(&mut self, cancel: Option<&Cancellation>) -> Result<()> {
        self.ensure_active()?;
        let session = self.session.clone();
        with_cancellation(cancel, async move {
            session.abort_transaction().await.map_err(Error::from)
        })
        .await?;

        self.state = TransactionState::Aborted;
        self.on_committed.lock().clear();
        info!(session = self.session.id(), "transaction aborted");
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(Error::Transaction(
                "transaction has already been committed".into(),
            )),
            TransactionState::Aborted => Err(Error::Transaction(
                "transaction has already been aborted".into(),
            )),
        }
    }

    fn bound(&self) -> Result<Option<&SessionHandle>> {
        self.ensure_active()?;
        Ok(Some(&self.session))
    }

    /// Save an entity inside the transaction.
    pub async fn save<T: Entity>(&self, entity: &mut T) -> Result<ReplaceOneResult> {
        let session = self.bound()?;
        self.db.save(entity, session).await
    }

    /// Save a batch of entities inside the transaction.
    pub async fn save_many<T: Entity>(&self, entities: &mut [T]) -> Result<BulkWriteResult> {
        let session = self.bound()?;
        self.db.save_many(entities, session).await
    }

    /// Save only the listed fields inside the transaction.
    pub async fn save_only<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
    ) -> Result<UpdateResult> {
        let session = self.bound()?;
        self.db.save_only(entity, fields, session).await
    }

    /// Save only the listed fields of a batch inside the transaction.
    pub async fn save_only_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
    ) -> Result<BulkWriteResult> {
        let session = self.bound()?;
        self.db.save_only_many(entities, fields, session).await
    }

    /// Save all but the listed fields inside the transaction.
    pub async fn save_except<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
    ) -> Result<UpdateResult> {
        let session = self.bound()?;
        self.db.save_except(entity, fields, session).await
    }

    /// Save all but the listed fields of a batch inside the transaction.
    pub async fn save_except_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
    ) -> Result<BulkWriteResult> {
        let session = self.bound()?;
        self.db.save_except_many(entities, fields, session).await
    }

    /// Preserving save inside the transaction.
    pub async fn save_preserving<T: Entity>(&self, entity: &mut T) -> Result<UpdateResult> {
        let session = self.bound()?;
        self.db.save_preserving(entity, session).await
    }

    /// Cascading delete of one entity inside the transaction.
    pub async fn delete<T: Entity>(
        &self,
        id: &str,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        let session = self.bound()?;
        self.db.delete::<T>(id, session, cancel).await
    }

    /// Cascading delete of a set of entities inside the transaction.
    pub async fn delete_many<T: Entity>(
        &self,
        ids: &[String],
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        let session = self.bound()?;
        self.db.delete_many::<T>(ids, session, cancel).await
    }

    /// Cascading delete of matching entities inside the transaction.
    pub async fn delete_matching<T: Entity>(
        &self,
        filter: Filter,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        let session = self.bound()?;
        self.db.delete_matching::<T>(filter, session, cancel).await
    }

    /// Find entities, seeing this transaction's staged writes.
    pub async fn find<T: Entity>(&self, filter: Filter, options: FindOptions) -> Result<Vec<T>> {
        let session = self.bound()?;
        self.db.find(filter, options, session).await
    }

    /// Find the first matching entity inside the transaction.
    pub async fn find_one<T: Entity>(&self, filter: Filter) -> Result<Option<T>> {
        let session = self.bound()?;
        self.db.find_one(filter, session).await
    }

    /// Count entities inside the transaction.
    pub async fn count<T: Entity>(&self, filter: Filter) -> Result<u64> {
        let session = self.bound()?;
        self.db.count::<T>(filter, session).await
    }

    /// Aggregate inside the transaction.
    pub async fn aggregate<T: Entity>(&self, stages: Vec<Stage>) -> Result<Vec<Document>> {
        let session = self.bound()?;
        self.db.aggregate::<T>(stages, session).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            warn!(
                session = self.session.id(),
                "transaction dropped without commit or abort; staged writes are discarded"
            );
        }
        self.session.end();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session.id())
            .field("state", &self.state)
            .field("on_committed", &self.on_committed.lock().len())
            .finish()
    }
}
