//! Result types returned by drivers.

use serde::{Deserialize, Serialize};

/// Result of a delete operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Number of documents removed.
    pub deleted_count: u64,
    /// Whether the server acknowledged the write.
    pub acknowledged: bool,
}

impl DeleteResult {
    /// An acknowledged result with the given count.
    pub fn acknowledged(deleted_count: u64) -> Self {
        Self {
            deleted_count,
            acknowledged: true,
        }
    }
}

/// Result of a single-document update or replace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents actually changed.
    pub modified_count: u64,
    /// Identity of the inserted document when the operation upserted.
    pub upserted_id: Option<String>,
    /// Whether the server acknowledged the write.
    pub acknowledged: bool,
}

impl UpdateResult {
    /// Result for an update that matched an existing document.
    pub fn matched(modified: bool) -> Self {
        Self {
            matched_count: 1,
            modified_count: u64::from(modified),
            upserted_id: None,
            acknowledged: true,
        }
    }

    /// Result for an update that inserted a new document.
    pub fn upserted(id: impl Into<String>) -> Self {
        Self {
            matched_count: 0,
            modified_count: 0,
            upserted_id: Some(id.into()),
            acknowledged: true,
        }
    }

    /// Result for an update that matched nothing and did not insert.
    pub fn unmatched() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }
}

/// Result of a full-document replace.
pub type ReplaceOneResult = UpdateResult;

/// A failure of one item inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteError {
    /// Position of the failing model in the submitted batch.
    pub index: usize,
    /// Driver-specific error code.
    pub code: i32,
    /// Error message.
    pub message: String,
}

impl WriteError {
    /// Create a write error.
    pub fn new(index: usize, code: i32, message: impl Into<String>) -> Self {
        Self {
            index,
            code,
            message: message.into(),
        }
    }
}

/// Result of a bulk write, with per-item failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkWriteResult {
    /// Documents matched by update/replace models.
    pub matched_count: u64,
    /// Documents changed by update/replace models.
    pub modified_count: u64,
    /// Documents removed by delete models.
    pub deleted_count: u64,
    /// Documents inserted by upserts.
    pub upserted_count: u64,
    /// `(model index, identity)` for each upserted document.
    pub upserted_ids: Vec<(usize, String)>,
    /// Items that failed. Other items were still applied unless the batch
    /// was ordered.
    pub write_errors: Vec<WriteError>,
    /// Number of models submitted.
    pub request_count: usize,
    /// Whether the server acknowledged the write.
    pub acknowledged: bool,
}

impl BulkWriteResult {
    /// Create an empty acknowledged result for a batch of the given size.
    pub fn new(request_count: usize) -> Self {
        Self {
            request_count,
            acknowledged: true,
            ..Self::default()
        }
    }

    /// Fold one update/replace outcome into the totals.
    pub fn record_update(&mut self, index: usize, result: &UpdateResult) {
        self.matched_count += result.matched_count;
        self.modified_count += result.modified_count;
        if let Some(id) = &result.upserted_id {
            self.upserted_count += 1;
            self.upserted_ids.push((index, id.clone()));
        }
    }

    /// Check whether every item succeeded.
    pub fn is_ok(&self) -> bool {
        self.write_errors.is_empty()
    }

    /// Number of items that were applied.
    pub fn succeeded_count(&self) -> usize {
        self.request_count.saturating_sub(self.write_errors.len())
    }
}
