//! In-memory collections.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use docmap_proto::document::{document_id, project};
use docmap_proto::pipeline::{self, sort_documents};
use docmap_proto::{
    BulkWriteResult, DeleteResult, Document, Filter, FindOptions, Stage, Update, UpdateResult,
    Value, WriteError, WriteModel, ID_FIELD,
};

use super::cursor::{MemoryCursor, DEFAULT_BATCH_SIZE};
use super::session::{MemorySession, Overlay};
use super::{Documents, Namespace, Store};
use crate::driver::{Collection, Cursor, SessionHandle, StoreResult};
use crate::entity::ObjectId;
use crate::error::StoreError;

/// The documents one operation reads and writes.
enum View<'a> {
    /// Committed data, written in place.
    Direct {
        data: &'a mut BTreeMap<Namespace, Documents>,
        namespace: &'a Namespace,
    },
    /// Committed data with a transaction's overlay on top.
    Staged {
        base: Option<&'a Documents>,
        overlay: &'a mut Overlay,
    },
}

impl View<'_> {
    fn documents(&self) -> Vec<Document> {
        match self {
            View::Direct { data, namespace } => data
                .get(*namespace)
                .map(|documents| documents.values().cloned().collect())
                .unwrap_or_default(),
            View::Staged { base, overlay } => {
                let mut merged = base.cloned().unwrap_or_default();
                for (id, document) in overlay.iter() {
                    match document {
                        Some(document) => {
                            merged.insert(id.clone(), document.clone());
                        }
                        None => {
                            merged.remove(id);
                        }
                    }
                }
                merged.into_values().collect()
            }
        }
    }

    fn first_match(&self, filter: &Filter) -> Option<Document> {
        self.documents().into_iter().find(|d| filter.matches(d))
    }

    fn put(&mut self, id: String, document: Document) {
        match self {
            View::Direct { data, namespace } => {
                data.entry((*namespace).clone())
                    .or_default()
                    .insert(id, document);
            }
            View::Staged { overlay, .. } => {
                overlay.insert(id, Some(document));
            }
        }
    }

    fn remove(&mut self, id: &str) {
        match self {
            View::Direct { data, namespace } => {
                if let Some(documents) = data.get_mut(*namespace) {
                    documents.remove(id);
                }
            }
            View::Staged { overlay, .. } => {
                overlay.insert(id.to_string(), None);
            }
        }
    }

    fn delete_many(&mut self, filter: &Filter) -> DeleteResult {
        let ids: Vec<String> = self
            .documents()
            .iter()
            .filter(|d| filter.matches(d))
            .filter_map(document_id)
            .map(str::to_string)
            .collect();
        for id in &ids {
            self.remove(id);
        }
        DeleteResult::acknowledged(ids.len() as u64)
    }

    fn replace_one(
        &mut self,
        filter: &Filter,
        mut replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        match self.first_match(filter) {
            Some(current) => {
                let id = identity_of(&current)?;
                ensure_same_identity(&replacement, &id)?;
                replacement.insert(ID_FIELD.to_string(), Value::from(id.as_str()));
                let modified = current != replacement;
                self.put(id, replacement);
                Ok(UpdateResult::matched(modified))
            }
            None if upsert => {
                let id = match replacement.get(ID_FIELD).and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => upsert_identity(filter),
                };
                replacement.insert(ID_FIELD.to_string(), Value::from(id.as_str()));
                self.put(id.clone(), replacement);
                Ok(UpdateResult::upserted(id))
            }
            None => Ok(UpdateResult::unmatched()),
        }
    }

    fn update_one(
        &mut self,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> StoreResult<UpdateResult> {
        match self.first_match(filter) {
            Some(mut document) => {
                let id = identity_of(&document)?;
                let changed = apply_update(update, &mut document)?;
                ensure_same_identity(&document, &id)?;
                if changed {
                    self.put(id, document);
                }
                Ok(UpdateResult::matched(changed))
            }
            None if upsert => {
                let id = upsert_identity(filter);
                let mut document = Document::new();
                seed_from_filter(filter, &mut document);
                document.insert(ID_FIELD.to_string(), Value::from(id.as_str()));
                apply_update(update, &mut document)?;
                ensure_same_identity(&document, &id)?;
                self.put(id.clone(), document);
                Ok(UpdateResult::upserted(id))
            }
            None => Ok(UpdateResult::unmatched()),
        }
    }

    fn bulk_write(&mut self, models: Vec<WriteModel>, ordered: bool) -> BulkWriteResult {
        let mut result = BulkWriteResult::new(models.len());
        for (index, model) in models.into_iter().enumerate() {
            let outcome = match model {
                WriteModel::ReplaceOne {
                    filter,
                    replacement,
                    upsert,
                } => self.replace_one(&filter, replacement, upsert).map(Some),
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                } => self.update_one(&filter, &update, upsert).map(Some),
                WriteModel::DeleteMany { filter } => {
                    result.deleted_count += self.delete_many(&filter).deleted_count;
                    Ok(None)
                }
            };
            match outcome {
                Ok(Some(update)) => result.record_update(index, &update),
                Ok(None) => {}
                Err(e) => {
                    result
                        .write_errors
                        .push(WriteError::new(index, e.code, e.message));
                    if ordered {
                        break;
                    }
                }
            }
        }
        result
    }
}

fn identity_of(document: &Document) -> StoreResult<String> {
    document_id(document)
        .map(str::to_string)
        .ok_or_else(|| StoreError::internal("stored document has no string _id"))
}

fn ensure_same_identity(document: &Document, id: &str) -> StoreResult<()> {
    match document.get(ID_FIELD) {
        None => Ok(()),
        Some(Value::String(current)) if current == id => Ok(()),
        Some(_) => Err(StoreError::new(
            StoreError::IMMUTABLE_FIELD,
            format!("the _id of document {} cannot be changed", id),
        )),
    }
}

fn upsert_identity(filter: &Filter) -> String {
    filter
        .equality_value(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| ObjectId::new().to_hex())
}

/// Copy root-level equality conditions of a filter into a new document.
fn seed_from_filter(filter: &Filter, document: &mut Document) {
    match filter {
        Filter::Eq { field, value } if !field.contains('.') => {
            document.insert(field.clone(), value.clone());
        }
        Filter::And(filters) => {
            for f in filters {
                seed_from_filter(f, document);
            }
        }
        _ => {}
    }
}

fn apply_update(update: &Update, document: &mut Document) -> StoreResult<bool> {
    update
        .apply(document, Utc::now())
        .map_err(|e| StoreError::internal(e.to_string()))
}

/// A collection of the in-memory driver.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    store: Arc<Store>,
    namespace: Namespace,
}

impl MemoryCollection {
    pub(crate) fn new(store: Arc<Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }

    fn memory_session<'s>(&self, session: &'s SessionHandle) -> StoreResult<&'s MemorySession> {
        session
            .as_any()
            .downcast_ref::<MemorySession>()
            .filter(|memory| memory.belongs_to(&self.store))
            .ok_or_else(|| {
                StoreError::new(
                    StoreError::INVALID_SESSION,
                    format!("session {} belongs to a different client", session.id()),
                )
            })
    }

    /// Run `operation` against committed data, or against the session's
    /// overlay when the session has an active transaction.
    fn with_view<R>(
        &self,
        session: Option<&SessionHandle>,
        operation: impl FnOnce(&mut View<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        if let Some(handle) = session {
            let memory = self.memory_session(handle)?;
            let data = self.store.data.read();
            let mut state = memory.state.lock();
            if state.ended {
                return Err(StoreError::new(
                    StoreError::INVALID_SESSION,
                    format!("session {} has ended", handle.id()),
                ));
            }
            if state.transaction.is_some() {
                let overlay = state.staged.entry(self.namespace.clone()).or_default();
                let mut view = View::Staged {
                    base: data.get(&self.namespace),
                    overlay,
                };
                return operation(&mut view);
            }
        }

        let mut data = self.store.data.write();
        let mut view = View::Direct {
            data: &mut *data,
            namespace: &self.namespace,
        };
        operation(&mut view)
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.namespace.1
    }

    async fn delete_many(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> StoreResult<DeleteResult> {
        self.with_view(session, |view| Ok(view.delete_many(&filter)))
    }

    async fn replace_one(
        &self,
        filter: Filter,
        replacement: Document,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult> {
        self.with_view(session, |view| view.replace_one(&filter, replacement, upsert))
    }

    async fn update_one(
        &self,
        filter: Filter,
        update: Update,
        upsert: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateResult> {
        self.with_view(session, |view| view.update_one(&filter, &update, upsert))
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        ordered: bool,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteResult> {
        self.with_view(session, |view| Ok(view.bulk_write(models, ordered)))
    }

    async fn find(
        &self,
        filter: Filter,
        options: FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Box<dyn Cursor>> {
        let mut documents: Vec<Document> = self.with_view(session, |view| {
            Ok(view
                .documents()
                .into_iter()
                .filter(|d| filter.matches(d))
                .collect())
        })?;

        sort_documents(&mut documents, &options.sort);
        let documents = documents
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX));
        let documents: Vec<Document> = match &options.projection {
            Some(fields) => documents.map(|d| project(&d, fields)).collect(),
            None => documents.collect(),
        };

        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        Ok(Box::new(MemoryCursor::new(documents, batch_size)))
    }

    async fn count(&self, filter: Filter, session: Option<&SessionHandle>) -> StoreResult<u64> {
        self.with_view(session, |view| {
            Ok(view.documents().iter().filter(|d| filter.matches(d)).count() as u64)
        })
    }

    async fn aggregate(
        &self,
        stages: Vec<Stage>,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        let documents = self.with_view(session, |view| Ok(view.documents()))?;
        pipeline::run(documents, &stages).map_err(|e| StoreError::internal(e.to_string()))
    }
}
