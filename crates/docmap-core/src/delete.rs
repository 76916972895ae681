//! Cascading delete engine.
//!
//! A cascading delete removes entities of type `T` together with every join
//! record that mentions them and, for file entities, their binary chunks.
//! Each round runs:
//!
//! 1. Resolve the identities to delete (explicit, or streamed from a cursor)
//! 2. Discover the join collections `T` takes part in
//! 3. Fan out one `delete_many` per join collection, the primary collection
//!    and the chunk collection, concurrently
//! 4. Await every sub-operation, reporting the first failure
//!
//! Without a session the fan-out is best-effort: sub-operations are
//! independently acknowledged and a failure in one does not roll back the
//! others. Cancellation is therefore only accepted together with a session.

use std::future::Future;

use docmap_proto::document::document_id;
use docmap_proto::{DeleteResult, Filter, FindOptions, Value, ID_FIELD};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::chunks::{CHUNK_COLLECTION, FILE_ID_FIELD};
use crate::driver::SessionHandle;
use crate::entity::Entity;
use crate::error::{Error, Result, StoreError};
use crate::gateway::Gateway;
use crate::relationship::{relationship_collections, CHILD_FIELD, PARENT_FIELD};

/// Which part of the fan-out a sub-operation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FanOutTarget {
    Primary,
    Join(String),
    Chunks,
}

/// Executes cascading deletes for one gateway.
pub struct CascadeDeleter<'a> {
    gateway: &'a Gateway,
    batch_size: usize,
}

impl<'a> CascadeDeleter<'a> {
    /// Create a deleter that processes at most `batch_size` identities per
    /// round.
    pub fn new(gateway: &'a Gateway, batch_size: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
        }
    }

    /// Delete one entity and everything that references it.
    pub async fn delete<T: Entity>(
        &self,
        id: &str,
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        check_cancellation(session, cancel)?;
        let ids = [id.to_string()];
        with_cancellation(cancel, self.cascade_round::<T>(&ids, session)).await
    }

    /// Delete a set of entities, in pages of the configured batch size.
    ///
    /// The returned count is the sum across pages.
    pub async fn delete_many<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        check_cancellation(session, cancel)?;
        with_cancellation(cancel, self.delete_pages::<T>(ids, session)).await
    }

    /// Delete every entity matching a filter.
    ///
    /// Matching identities are streamed from a cursor one page at a time and
    /// each page is deleted in its own round. Data filters do not apply here.
    pub async fn delete_matching<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
        cancel: Option<&Cancellation>,
    ) -> Result<DeleteResult> {
        check_cancellation(session, cancel)?;
        with_cancellation(cancel, self.delete_streamed::<T>(filter, session)).await
    }

    async fn delete_pages<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&SessionHandle>,
    ) -> Result<DeleteResult> {
        if ids.len() <= self.batch_size {
            return self.cascade_round::<T>(ids, session).await;
        }

        let mut deleted = 0;
        for page in ids.chunks(self.batch_size) {
            deleted += self.cascade_round::<T>(page, session).await?.deleted_count;
        }
        Ok(DeleteResult::acknowledged(deleted))
    }

    async fn delete_streamed<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> Result<DeleteResult> {
        let options = FindOptions::new()
            .with_projection([ID_FIELD])
            .with_batch_size(self.batch_size);
        let mut cursor = self
            .gateway
            .collection_for::<T>()
            .find(filter, options, session)
            .await?;

        let mut deleted = 0;
        while let Some(batch) = cursor.next_batch().await? {
            let ids: Vec<String> = batch
                .iter()
                .filter_map(document_id)
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                continue;
            }
            deleted += self.cascade_round::<T>(&ids, session).await?.deleted_count;
        }
        Ok(DeleteResult::acknowledged(deleted))
    }

    /// One cascading round over a page of identities.
    async fn cascade_round<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&SessionHandle>,
    ) -> Result<DeleteResult> {
        // A join collection lives in its parent's database, so `T` can appear
        // as a child in any database the gateway resolves to.
        let mut join_collections = Vec::new();
        for database_name in self.gateway.database_names() {
            let database = self.gateway.client().database(&database_name);
            for name in relationship_collections(database.as_ref(), T::COLLECTION).await? {
                join_collections.push((database.clone(), name));
            }
        }

        debug!(
            entity = T::COLLECTION,
            ids = ids.len(),
            collections = join_collections.len(),
            file_entity = T::FILE_ENTITY,
            "cascading delete round"
        );

        let values: Vec<Value> = ids.iter().map(|id| Value::from(id.as_str())).collect();
        let mut operations: FuturesUnordered<
            BoxFuture<'_, (FanOutTarget, std::result::Result<DeleteResult, StoreError>)>,
        > = FuturesUnordered::new();

        for (database, name) in join_collections {
            let collection = database.collection(&name);
            let filter = Filter::is_in(PARENT_FIELD, values.clone())
                .or(Filter::is_in(CHILD_FIELD, values.clone()));
            operations.push(
                async move {
                    let result = collection.delete_many(filter, session).await;
                    (FanOutTarget::Join(name), result)
                }
                .boxed(),
            );
        }

        let primary = self.gateway.collection_for::<T>();
        let filter = Filter::is_in(ID_FIELD, values.clone());
        operations.push(
            async move {
                let result = primary.delete_many(filter, session).await;
                (FanOutTarget::Primary, result)
            }
            .boxed(),
        );

        if T::FILE_ENTITY {
            let chunks = self.gateway.database_for::<T>().collection(CHUNK_COLLECTION);
            let filter = Filter::is_in(FILE_ID_FIELD, values);
            operations.push(
                async move {
                    let result = chunks.delete_many(filter, session).await;
                    (FanOutTarget::Chunks, result)
                }
                .boxed(),
            );
        }

        // Every sub-operation is driven to completion; the first failure
        // decides the outcome.
        let mut primary_result = None;
        let mut first_error: Option<StoreError> = None;
        while let Some((target, result)) = operations.next().await {
            match result {
                Ok(deleted) => {
                    debug!(
                        entity = T::COLLECTION,
                        part = ?target,
                        deleted = deleted.deleted_count,
                        "fan-out delete finished"
                    );
                    if target == FanOutTarget::Primary {
                        primary_result = Some(deleted);
                    }
                }
                Err(e) => {
                    warn!(entity = T::COLLECTION, part = ?target, error = %e, "fan-out delete failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(Error::Storage(e));
        }
        Ok(primary_result.unwrap_or_else(|| DeleteResult::acknowledged(0)))
    }
}

/// Reject a cancellation signal supplied without a session.
pub fn check_cancellation(
    session: Option<&SessionHandle>,
    cancel: Option<&Cancellation>,
) -> Result<()> {
    if cancel.is_some() && session.is_none() {
        return Err(Error::NotSupported(
            "cancellation is only supported within a transaction for delete operations".into(),
        ));
    }
    Ok(())
}

/// Race an operation against an optional cancellation signal.
pub async fn with_cancellation<F, T>(cancel: Option<&Cancellation>, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match cancel {
        None => operation.await,
        Some(cancel) => {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                result = operation => result,
                _ = cancel.cancelled() => Err(Error::Cancelled),
            }
        }
    }
}
