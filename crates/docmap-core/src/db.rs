//! The `Db` entry point.

use std::sync::Arc;

use async_trait::async_trait;
use docmap_proto::{
    BulkWriteResult, DeleteResult, Document, Filter, FindOptions, ReplaceOneResult, Stage,
    TransactionOptions, UpdateResult,
};

use crate::cancel::Cancellation;
use crate::chunks::ChunkStore;
use crate::config::DbConfig;
use crate::delete::CascadeDeleter;
use crate::driver::{Client, Collection, Database, SessionHandle};
use crate::entity::Entity;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::hooks::{DataFilter, HookRegistry, SaveInterceptor};
use crate::read::Reader;
use crate::relationship::{join_collection_name, Relationship};
use crate::save::SaveEngine;
use crate::transaction::Transaction;

/// Entity persistence over a document-database client.
///
/// Every operation takes an optional session. Without one, each write is
/// independently acknowledged; with one, writes are staged under that
/// session's transaction. [`Transaction`] binds a session for you.
///
/// `Db` is cheap to clone; clones share the gateway and hook registry.
#[derive(Clone)]
pub struct Db {
    gateway: Arc<Gateway>,
    hooks: Arc<HookRegistry>,
    config: DbConfig,
}

impl Db {
    /// Create a `Db` that uses the process-wide hook registry.
    pub fn new(client: Arc<dyn Client>, config: DbConfig) -> Self {
        Self::with_hooks(client, config, HookRegistry::global())
    }

    /// Create a `Db` with its own hook registry.
    pub fn with_hooks(client: Arc<dyn Client>, config: DbConfig, hooks: Arc<HookRegistry>) -> Self {
        let gateway = Arc::new(Gateway::new(client, config.default_database.clone()));
        Self {
            gateway,
            hooks,
            config,
        }
    }

    /// A `Db` sharing this one's client, hooks and type bindings, whose
    /// unbound entity types resolve to `database`.
    pub fn scoped_to(&self, database: impl Into<String>) -> Self {
        let database = database.into();
        let mut config = self.config.clone();
        config.default_database = database.clone();
        Self {
            gateway: Arc::new(self.gateway.rebased(database)),
            hooks: self.hooks.clone(),
            config,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Hook registry used by this `Db`.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<dyn Client> {
        self.gateway.client()
    }

    // Gateway

    /// Store entities of type `T` in the named database.
    pub fn bind_database<T: Entity>(&self, database: impl Into<String>) {
        self.gateway.bind_database::<T>(database);
    }

    /// Database handle for `T`.
    pub fn database_for<T: Entity>(&self) -> Arc<dyn Database> {
        self.gateway.database_for::<T>()
    }

    /// Primary collection handle for `T`.
    pub fn collection_for<T: Entity>(&self) -> Arc<dyn Collection> {
        self.gateway.collection_for::<T>()
    }

    // Hooks

    /// Register a save interceptor in this `Db`'s registry.
    pub fn register_save_interceptor<I: SaveInterceptor>(&self, interceptor: I) -> Result<()> {
        self.hooks.register_save_interceptor(interceptor)
    }

    /// Register a data filter in this `Db`'s registry.
    pub fn register_data_filter<F: DataFilter>(&self, filter: F) -> Result<()> {
        self.hooks.register_data_filter(filter)
    }

    // Saves

    fn saver(&self) -> SaveEngine<'_> {
        SaveEngine::new(&self.gateway, &self.hooks)
    }

    /// Replace-or-insert an entity by identity.
    pub async fn save<T: Entity>(
        &self,
        entity: &mut T,
        session: Option<&SessionHandle>,
    ) -> Result<ReplaceOneResult> {
        self.saver().save(entity, session).await
    }

    /// Replace-or-insert a batch of entities as one unordered bulk write.
    pub async fn save_many<T: Entity>(
        &self,
        entities: &mut [T],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        self.saver().save_many(entities, session).await
    }

    /// Upsert only the listed root-level fields of an entity.
    pub async fn save_only<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        self.saver().save_only(entity, fields, session).await
    }

    /// Upsert only the listed root-level fields of a batch of entities.
    pub async fn save_only_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        self.saver().save_only_many(entities, fields, session).await
    }

    /// Upsert every root-level field of an entity except the listed ones.
    pub async fn save_except<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        self.saver().save_except(entity, fields, session).await
    }

    /// Upsert every root-level field of a batch of entities except the
    /// listed ones.
    pub async fn save_except_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        self.saver().save_except_many(entities, fields, session).await
    }

    /// Upsert the fields the type's preservation table leaves writable.
    pub async fn save_preserving<T: Entity>(
        &self,
        entity: &mut T,
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        self.saver().save_preserving(entity, session).await
    }

    // Deletes

    fn deleter(&self) -> CascadeDeleter<'_> {
        CascadeDeleter::new(&self.gateway, self.config.delete_batch_size)
    }

    /// Delete an entity with its join records and chunks.
    ///
    /// A cancellation signal is only accepted together with a session.
    pub async fn delete<T: Entity>(
        &self,
        id: &str,
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        self.deleter().delete::<T>(id, session, cancel).await
    }

    /// Delete a set of entities with their join records and chunks.
    pub async fn delete_many<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        self.deleter().delete_many::<T>(ids, session, cancel).await
    }

    /// Delete every entity matching a filter, with join records and chunks.
    pub async fn delete_matching<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        self.deleter()
            .delete_matching::<T>(filter, session, cancel)
            .await
    }

    // Reads

    fn reader(&self) -> Reader<'_> {
        Reader::new(&self.gateway, &self.hooks)
    }

    /// Find entities matching a filter.
    pub async fn find<T: Entity>(
        &self,
        filter: Filter,
        options: FindOptions,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<T>> {
        self.reader().find(filter, options, session).await
    }

    /// Find the first entity matching a filter.
    pub async fn find_one<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> Result<Option<T>> {
        self.reader().find_one(filter, session).await
    }

    /// Count entities matching a filter.
    pub async fn count<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> Result<u64> {
        self.reader().count::<T>(filter, session).await
    }

    /// Run an aggregation pipeline over the primary collection of `T`.
    pub async fn aggregate<T: Entity>(
        &self,
        stages: Vec<Stage>,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<Document>> {
        self.reader().aggregate::<T>(stages, session).await
    }

    // Relationships and chunks

    /// Handle for the relationship property `property` from `P` to `C`.
    ///
    /// The join collection lives in the parent's database.
    pub fn relationship<P: Entity, C: Entity>(&self, property: &str) -> Relationship<P, C> {
        let name = join_collection_name(P::COLLECTION, C::COLLECTION, property);
        let collection = self.gateway.database_for::<P>().collection(&name);
        Relationship::new(collection, property)
    }

    /// Store a file entity's payload as ordered chunks.
    pub async fn upload_chunks<T: Entity>(
        &self,
        file_id: &str,
        bytes: &[u8],
        chunk_size: usize,
        session: Option<&SessionHandle>,
    ) -> Result<usize> {
        ChunkStore::new(&self.gateway)
            .upload::<T>(file_id, bytes, chunk_size, session)
            .await
    }

    /// Reassemble a file entity's payload from its chunks.
    pub async fn download_chunks<T: Entity>(
        &self,
        file_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<u8>> {
        ChunkStore::new(&self.gateway)
            .download::<T>(file_id, session)
            .await
    }

    /// Number of chunks stored for a file entity.
    pub async fn chunk_count<T: Entity>(
        &self,
        file_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<u64> {
        ChunkStore::new(&self.gateway)
            .count::<T>(file_id, session)
            .await
    }

    // Transactions

    /// Begin a transaction.
    pub async fn transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        Transaction::begin(self, options).await
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Saving through an entity's bound session.
#[async_trait]
pub trait EntityExt: Entity {
    /// Save the entity, inside its bound transaction if one is attached and
    /// still alive.
    async fn save_attached(&mut self, db: &Db) -> Result<ReplaceOneResult>;
}

#[async_trait]
impl<T: Entity> EntityExt for T {
    async fn save_attached(&mut self, db: &Db) -> Result<ReplaceOneResult> {
        let session = self.session();
        db.save(self, session.as_ref()).await
    }
}
