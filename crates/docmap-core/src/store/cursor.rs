//! In-memory cursors.

use std::collections::VecDeque;

use async_trait::async_trait;
use docmap_proto::Document;

use crate::driver::{Cursor, StoreResult};

/// Default documents per batch.
pub const DEFAULT_BATCH_SIZE: usize = 101;

/// A cursor over a snapshot of matching documents.
#[derive(Debug, Default)]
pub struct MemoryCursor {
    batches: VecDeque<Vec<Document>>,
}

impl MemoryCursor {
    /// Split a snapshot into batches.
    pub fn new(documents: Vec<Document>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let mut batches = VecDeque::new();
        let mut iter = documents.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push_back(iter.by_ref().take(batch_size).collect());
        }
        Self { batches }
    }

    /// Batches not yet fetched.
    pub fn remaining_batches(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn next_batch(&mut self) -> StoreResult<Option<Vec<Document>>> {
        Ok(self.batches.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| json!({ "_id": i.to_string() }).as_object().cloned().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_batches() {
        let mut cursor = MemoryCursor::new(docs(5), 2);
        assert_eq!(cursor.remaining_batches(), 3);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 1);
        assert!(cursor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let mut cursor = MemoryCursor::new(Vec::new(), 10);
        assert!(cursor.next_batch().await.unwrap().is_none());
    }
}
