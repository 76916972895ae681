//! Binary chunks owned by file entities.

use docmap_proto::document::{from_document, to_document};
use docmap_proto::{Filter, FindOptions, SortSpec, WriteModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{collect_cursor, SessionHandle};
use crate::entity::{Entity, ObjectId};
use crate::error::{Error, Result, StoreError};
use crate::gateway::Gateway;

/// Collection holding the chunks of every file entity in a database.
pub const CHUNK_COLLECTION: &str = "[BINARY_CHUNKS]";

/// Field holding the owning file's identity.
pub const FILE_ID_FIELD: &str = "FileID";

/// Default chunk size (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// One ordered fragment of a file entity's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Chunk identity.
    #[serde(rename = "_id")]
    pub id: String,
    /// Identity of the owning file entity.
    #[serde(rename = "FileID")]
    pub file_id: String,
    /// Position of the chunk within the file.
    #[serde(rename = "Order")]
    pub order: u64,
    /// Hex-encoded payload.
    #[serde(rename = "Data")]
    pub data: String,
}

/// Writes and reads chunks for file entities.
pub struct ChunkStore<'a> {
    gateway: &'a Gateway,
}

impl<'a> ChunkStore<'a> {
    /// Create a chunk store over a gateway.
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    /// Split `bytes` into ordered chunks owned by `file_id`.
    ///
    /// Existing chunks of the file are replaced. Returns the number of
    /// chunks written.
    pub async fn upload<T: Entity>(
        &self,
        file_id: &str,
        bytes: &[u8],
        chunk_size: usize,
        session: Option<&SessionHandle>,
    ) -> Result<usize> {
        ensure_file_entity::<T>(file_id)?;
        let collection = self.gateway.database_for::<T>().collection(CHUNK_COLLECTION);

        collection
            .delete_many(Filter::eq(FILE_ID_FIELD, file_id), session)
            .await?;

        let mut models = Vec::new();
        for (order, data) in bytes.chunks(chunk_size.max(1)).enumerate() {
            let chunk = FileChunk {
                id: ObjectId::new().to_hex(),
                file_id: file_id.to_string(),
                order: order as u64,
                data: hex::encode(data),
            };
            models.push(WriteModel::replace_upsert(
                Filter::eq("_id", chunk.id.as_str()),
                to_document(&chunk)?,
            ));
        }

        let count = models.len();
        if count > 0 {
            let result = collection.bulk_write(models, true, session).await?;
            if let Some(failure) = result.write_errors.first() {
                return Err(Error::Storage(StoreError::new(
                    failure.code,
                    failure.message.clone(),
                )));
            }
        }

        debug!(entity = T::COLLECTION, file = file_id, chunks = count, "uploaded chunks");
        Ok(count)
    }

    /// Reassemble the payload of a file entity.
    pub async fn download<T: Entity>(
        &self,
        file_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<u8>> {
        ensure_file_entity::<T>(file_id)?;
        let collection = self.gateway.database_for::<T>().collection(CHUNK_COLLECTION);
        let options = FindOptions::new().with_sort(SortSpec::asc("Order"));
        let cursor = collection
            .find(Filter::eq(FILE_ID_FIELD, file_id), options, session)
            .await?;

        let mut bytes = Vec::new();
        for document in collect_cursor(cursor).await? {
            let chunk: FileChunk = from_document(document)?;
            let data = hex::decode(&chunk.data).map_err(|e| {
                Error::Proto(docmap_proto::Error::Deserialization(format!(
                    "chunk {} of {}: {}",
                    chunk.order, file_id, e
                )))
            })?;
            bytes.extend_from_slice(&data);
        }
        Ok(bytes)
    }

    /// Number of chunks stored for a file entity.
    pub async fn count<T: Entity>(
        &self,
        file_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<u64> {
        let collection = self.gateway.database_for::<T>().collection(CHUNK_COLLECTION);
        Ok(collection
            .count(Filter::eq(FILE_ID_FIELD, file_id), session)
            .await?)
    }
}

fn ensure_file_entity<T: Entity>(file_id: &str) -> Result<()> {
    if !T::FILE_ENTITY {
        return Err(Error::Argument(format!(
            "{} is not a file entity",
            T::COLLECTION
        )));
    }
    if file_id.is_empty() {
        return Err(Error::Argument(
            "save the file entity before uploading its data".into(),
        ));
    }
    Ok(())
}
