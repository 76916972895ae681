//! Relationship join records.
//!
//! Each relationship property is stored in its own join collection named
//! `[{Parent}~{Child}({property})]`. A join record holds one edge.

use std::marker::PhantomData;
use std::sync::Arc;

use docmap_proto::document::from_document;
use docmap_proto::{
    BulkWriteResult, DeleteResult, Filter, FindOptions, NamePattern, Update, UpdateOp,
    UpdateResult, WriteModel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{collect_cursor, Collection, Database, SessionHandle, StoreResult};
use crate::entity::Entity;
use crate::error::Result;

/// Field holding the parent identity.
pub const PARENT_FIELD: &str = "ParentID";

/// Field holding the child identity.
pub const CHILD_FIELD: &str = "ChildID";

/// One edge of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRecord {
    /// Record identity.
    #[serde(rename = "_id")]
    pub id: String,
    /// Parent entity identity.
    #[serde(rename = "ParentID")]
    pub parent_id: String,
    /// Child entity identity.
    #[serde(rename = "ChildID")]
    pub child_id: String,
}

/// Name of the join collection for a relationship property.
pub fn join_collection_name(parent: &str, child: &str, property: &str) -> String {
    format!("[{}~{}({})]", parent, child, property)
}

/// Split a join collection name into `(parent, child, property)`.
pub fn parse_join_collection_name(name: &str) -> Option<(&str, &str, &str)> {
    let inner = name.strip_prefix('[')?.strip_suffix(")]")?;
    let (participants, property) = inner.split_once('(')?;
    let (parent, child) = participants.split_once('~')?;
    if parent.is_empty() || child.is_empty() {
        return None;
    }
    Some((parent, child, property))
}

/// List the join collections in which `collection` takes part.
///
/// The listing is not session-scoped.
pub async fn relationship_collections(
    database: &dyn Database,
    collection: &str,
) -> StoreResult<Vec<String>> {
    let pattern = NamePattern::containing(["~", collection]);
    let names = database.list_collection_names(&pattern).await?;
    Ok(names
        .into_iter()
        .filter(|name| match parse_join_collection_name(name) {
            Some((parent, child, _)) => parent == collection || child == collection,
            None => false,
        })
        .collect())
}

/// A relationship property between a parent type and a child type.
pub struct Relationship<P, C> {
    collection: Arc<dyn Collection>,
    property: String,
    _types: PhantomData<fn() -> (P, C)>,
}

impl<P: Entity, C: Entity> Relationship<P, C> {
    /// Create a relationship over an existing join collection handle.
    pub fn new(collection: Arc<dyn Collection>, property: impl Into<String>) -> Self {
        Self {
            collection,
            property: property.into(),
            _types: PhantomData,
        }
    }

    /// Join collection name for this relationship.
    pub fn collection_name(&self) -> String {
        join_collection_name(P::COLLECTION, C::COLLECTION, &self.property)
    }

    /// Relationship property name.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Link a parent to a child. Linking twice keeps one record.
    pub async fn add(
        &self,
        parent_id: &str,
        child_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        let (filter, update) = edge_upsert(parent_id, child_id);
        debug!(
            relationship = %self.collection_name(),
            parent = parent_id,
            child = child_id,
            "adding join record"
        );
        Ok(self.collection.update_one(filter, update, true, session).await?)
    }

    /// Link a parent to several children in one unordered bulk write.
    pub async fn add_many(
        &self,
        parent_id: &str,
        child_ids: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        if child_ids.is_empty() {
            return Ok(BulkWriteResult::new(0));
        }
        let models = child_ids
            .iter()
            .map(|child_id| {
                let (filter, update) = edge_upsert(parent_id, child_id);
                WriteModel::update_upsert(filter, update)
            })
            .collect();
        Ok(self.collection.bulk_write(models, false, session).await?)
    }

    /// Unlink a parent from a child.
    pub async fn remove(
        &self,
        parent_id: &str,
        child_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<DeleteResult> {
        Ok(self
            .collection
            .delete_many(edge_filter(parent_id, child_id), session)
            .await?)
    }

    /// Identities of the children linked to a parent.
    pub async fn child_ids(
        &self,
        parent_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<String>> {
        self.linked(Filter::eq(PARENT_FIELD, parent_id), CHILD_FIELD, session)
            .await
    }

    /// Identities of the parents linked to a child.
    pub async fn parent_ids(
        &self,
        child_id: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<String>> {
        self.linked(Filter::eq(CHILD_FIELD, child_id), PARENT_FIELD, session)
            .await
    }

    /// All join records of this relationship.
    pub async fn records(&self, session: Option<&SessionHandle>) -> Result<Vec<JoinRecord>> {
        let cursor = self
            .collection
            .find(Filter::All, FindOptions::new(), session)
            .await?;
        collect_cursor(cursor)
            .await?
            .into_iter()
            .map(|document| Ok(from_document(document)?))
            .collect()
    }

    async fn linked(
        &self,
        filter: Filter,
        field: &str,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<String>> {
        let options = FindOptions::new().with_projection([field]);
        let cursor = self.collection.find(filter, options, session).await?;
        let documents = collect_cursor(cursor).await?;
        Ok(documents
            .iter()
            .filter_map(|document| {
                document
                    .get(field)
                    .and_then(|value| value.as_str())
                    .map(str::to_string)
            })
            .collect())
    }
}

fn edge_filter(parent_id: &str, child_id: &str) -> Filter {
    Filter::eq(PARENT_FIELD, parent_id).and(Filter::eq(CHILD_FIELD, child_id))
}

fn edge_upsert(parent_id: &str, child_id: &str) -> (Filter, Update) {
    let update = Update::combine(vec![
        UpdateOp::set(PARENT_FIELD, parent_id),
        UpdateOp::set(CHILD_FIELD, child_id),
    ]);
    (edge_filter(parent_id, child_id), update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_collection_name() {
        assert_eq!(
            join_collection_name("Flower", "Customer", "Customers"),
            "[Flower~Customer(Customers)]"
        );
    }

    #[test]
    fn test_parse_join_collection_name() {
        assert_eq!(
            parse_join_collection_name("[Flower~Customer(Customers)]"),
            Some(("Flower", "Customer", "Customers"))
        );
        assert_eq!(parse_join_collection_name("Flower"), None);
        assert_eq!(parse_join_collection_name("[~Customer(x)]"), None);
        assert_eq!(parse_join_collection_name("[Flower~Customer]"), None);
    }

    #[test]
    fn test_edge_filter_shape() {
        let doc = serde_json::json!({"ParentID": "p", "ChildID": "c"});
        let doc = doc.as_object().unwrap();
        assert!(edge_filter("p", "c").matches(doc));
        assert!(!edge_filter("p", "x").matches(doc));
    }
}
