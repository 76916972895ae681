//! Bulk write models.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::filter::Filter;
use crate::update::Update;

/// One operation inside a bulk write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteModel {
    /// Replace the first matching document.
    ReplaceOne {
        /// Selects the document to replace.
        filter: Filter,
        /// The full replacement document.
        replacement: Document,
        /// Insert when nothing matches.
        upsert: bool,
    },
    /// Apply an update to the first matching document.
    UpdateOne {
        /// Selects the document to update.
        filter: Filter,
        /// Field operators to apply.
        update: Update,
        /// Insert when nothing matches.
        upsert: bool,
    },
    /// Delete every matching document.
    DeleteMany {
        /// Selects the documents to delete.
        filter: Filter,
    },
}

impl WriteModel {
    /// Create an upserting replace model.
    pub fn replace_upsert(filter: Filter, replacement: Document) -> Self {
        WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert: true,
        }
    }

    /// Create an upserting update model.
    pub fn update_upsert(filter: Filter, update: Update) -> Self {
        WriteModel::UpdateOne {
            filter,
            update,
            upsert: true,
        }
    }

    /// The filter this model selects with.
    pub fn filter(&self) -> &Filter {
        match self {
            WriteModel::ReplaceOne { filter, .. }
            | WriteModel::UpdateOne { filter, .. }
            | WriteModel::DeleteMany { filter } => filter,
        }
    }
}
