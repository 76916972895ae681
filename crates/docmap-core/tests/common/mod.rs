//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docmap_core::driver::{Client, Collection, Cursor, Database, SessionHandle, StoreResult};
use docmap_core::proto::{
    BulkWriteResult, DeleteResult, Document, Filter, FindOptions, NamePattern, SessionOptions,
    Stage, Update, UpdateResult, WriteError, WriteModel,
};
use docmap_core::{
    Db, DbConfig, Entity, HookRegistry, MemoryClient, Preservation, SessionSlot, StoreError,
};
use serde::{Deserialize, Serialize};

pub const DATABASE: &str = "shop";

/// Install a test log writer once per binary. `RUST_LOG` controls output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

macro_rules! identity {
    () => {
        fn id(&self) -> &str {
            &self.id
        }
        fn set_id(&mut self, id: String) {
            self.id = id;
        }
        fn created_on(&self) -> Option<DateTime<Utc>> {
            self.created_on
        }
        fn set_created_on(&mut self, at: DateTime<Utc>) {
            self.created_on = Some(at);
        }
    };
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Flower {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub name: String,
    pub color: String,
    #[serde(skip)]
    pub session: SessionSlot,
}

impl Flower {
    pub fn new(name: &str, color: &str) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            ..Self::default()
        }
    }
}

impl Entity for Flower {
    const COLLECTION: &'static str = "Flower";

    identity!();

    fn session_slot(&self) -> Option<&SessionSlot> {
        Some(&self.session)
    }

    fn session_slot_mut(&mut self) -> Option<&mut SessionSlot> {
        Some(&mut self.session)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub name: String,
    pub tag: String,
}

impl Customer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Customer {
    const COLLECTION: &'static str = "Customer";
    const SAVE_INTERCEPTED: bool = true;

    identity!();
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub modified_on: Option<DateTime<Utc>>,
    pub name: String,
    pub email: String,
    pub bio: String,
    pub visits: u64,
}

impl Entity for Profile {
    const COLLECTION: &'static str = "Profile";
    const MODIFIED_ON_FIELD: Option<&'static str> = Some("modified_on");

    identity!();

    fn set_modified_on(&mut self, at: DateTime<Utc>) {
        self.modified_on = Some(at);
    }

    fn field_preservation() -> &'static [(&'static str, Preservation)] {
        &[("visits", Preservation::Preserve)]
    }
}

/// Only `email` is ever written by a preserving save.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub email: String,
    pub note: String,
}

impl Entity for Contact {
    const COLLECTION: &'static str = "Contact";

    identity!();

    fn field_preservation() -> &'static [(&'static str, Preservation)] {
        &[("email", Preservation::DontPreserve)]
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Conflicted {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub a: String,
    pub b: String,
}

impl Entity for Conflicted {
    const COLLECTION: &'static str = "Conflicted";

    identity!();

    fn field_preservation() -> &'static [(&'static str, Preservation)] {
        &[("a", Preservation::Preserve), ("b", Preservation::DontPreserve)]
    }
}

/// Preserves every serialized field, leaving nothing for a preserving save.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub balance: i64,
}

impl Entity for Ledger {
    const COLLECTION: &'static str = "Ledger";

    identity!();

    fn field_preservation() -> &'static [(&'static str, Preservation)] {
        &[
            ("created_on", Preservation::Preserve),
            ("balance", Preservation::Preserve),
        ]
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Photo {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub title: String,
}

impl Entity for Photo {
    const COLLECTION: &'static str = "Photo";
    const FILE_ENTITY: bool = true;

    identity!();
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_on: Option<DateTime<Utc>>,
    pub tenant: String,
    pub total: i64,
}

impl Entity for Order {
    const COLLECTION: &'static str = "Order";
    const DATA_FILTERED: bool = true;

    identity!();
}

pub struct TestContext {
    pub client: MemoryClient,
    pub db: Db,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(DbConfig::new(DATABASE))
    }

    pub fn with_config(config: DbConfig) -> Self {
        init_tracing();
        let client = MemoryClient::new();
        let db = Db::with_hooks(
            Arc::new(client.clone()),
            config,
            Arc::new(HookRegistry::new()),
        );
        Self { client, db }
    }

    /// Committed documents of a collection in the test database.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.client.documents(DATABASE, collection)
    }
}

/// A driver wrapper that fails `delete_many` on collections whose name
/// contains a marker, and counts every data operation it forwards.
///
/// With [`FaultyClient::rejecting`], bulk replace models whose document holds
/// the given string value fail as individual items.
pub struct FaultyClient {
    inner: MemoryClient,
    fail_deletes_in: String,
    rejected_value: Option<String>,
    pub operations: Arc<AtomicUsize>,
}

impl FaultyClient {
    pub fn new(inner: MemoryClient, fail_deletes_in: &str) -> Self {
        Self {
            inner,
            fail_deletes_in: fail_deletes_in.into(),
            rejected_value: None,
            operations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn rejecting(mut self, value: &str) -> Self {
        self.rejected_value = Some(value.into());
        self
    }
}

#[async_trait]
impl Client for FaultyClient {
    fn database(&self, name: &str) -> Arc<dyn Database> {
        Arc::new(FaultyDatabase {
            inner: self.inner.database(name),
            fail_deletes_in: self.fail_deletes_in.clone(),
            rejected_value: self.rejected_value.clone(),
            operations: self.operations.clone(),
        })
    }

    async fn start_session(&self, options: SessionOptions) -> StoreResult<SessionHandle> {
        self.inner.start_session(options).await
    }
}

struct FaultyDatabase {
    inner: Arc<dyn Database>,
    fail_deletes_in: String,
    rejected_value: Option<String>,
    operations: Arc<AtomicUsize>,
}

#[async_trait]
impl Database for FaultyDatabase {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(FaultyCollection {
            fail_deletes: name.contains(&self.fail_deletes_in),
            rejected_value: self.rejected_value.clone(),
            inner: self.inner.collection(name),
            operations: self.operations.clone(),
        })
    }

    async fn list_collection_names(&self, pattern: &NamePattern) -> StoreResult<Vec<String>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.inner.list_collection_names(pattern).await
    }
}

struct FaultyCollection {
    inner: Arc<dyn Collection>,
    fail_deletes: bool,
    rejected_value: Option<String>,
    operations: Arc<AtomicUsize>,
}

impl FaultyCollection {
    fn record(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn rejects(&self, model: &WriteModel) -> bool {
        let Some(value) = self.rejected_value.as_deref() else {
            return false;
        };
        match model {
            WriteModel::ReplaceOne { replacement, .. } => replacement
                .values()
                .any(|field| field.as_str() == Some(value)),
            _ => false,
        }
    }
}

#[async_trait]
impl Collection for FaultyCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn delete_many(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> StoreResult<DeleteResult> {
        self.record();
        if self.fail_deletes {
            return Err(StoreError::new(91, "shutdown in progress"));
        }
        self.inner.delete_many(filter, session).await
    }

    async fn replace_one(
        &self,
        filter: Filter,
        replacement: Document,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult> {
        self.record();
        self.inner
            .replace_one(filter, replacement, upsert, session)
            .await
    }

    async fn update_one(
        &self,
        filter: Filter,
        update: Update,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult> {
        self.record();
        self.inner.update_one(filter, update, upsert, session).await
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        ordered: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteResult> {
        self.record();
        let request_count = models.len();
        let mut forwarded = Vec::new();
        let mut positions = Vec::new();
        let mut rejected = Vec::new();
        for (index, model) in models.into_iter().enumerate() {
            if self.rejects(&model) {
                rejected.push(WriteError::new(index, 11000, "duplicate key"));
                if ordered {
                    break;
                }
            } else {
                positions.push(index);
                forwarded.push(model);
            }
        }

        let mut result = self.inner.bulk_write(forwarded, ordered, session).await?;
        for (index, _) in result.upserted_ids.iter_mut() {
            *index = positions[*index];
        }
        for error in result.write_errors.iter_mut() {
            error.index = positions[error.index];
        }
        result.write_errors.extend(rejected);
        result.write_errors.sort_by_key(|error| error.index);
        result.request_count = request_count;
        Ok(result)
    }

    async fn find(
        &self,
        filter: Filter,
        options: FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Box<dyn Cursor>> {
        self.record();
        self.inner.find(filter, options, session).await
    }

    async fn count(&self, filter: Filter, session: Option<&SessionHandle>) -> StoreResult<u64> {
        self.record();
        self.inner.count(filter, session).await
    }

    async fn aggregate(
        &self,
        stages: Vec<Stage>,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        self.record();
        self.inner.aggregate(stages, session).await
    }
}
