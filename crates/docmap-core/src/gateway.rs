//! Entity type to collection resolution.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::driver::{Client, Collection, Database};
use crate::entity::Entity;

/// Resolves entity types to their database and collection handles.
///
/// Handles are memoized per type. Resolution has no side effects on the
/// store.
pub struct Gateway {
    client: Arc<dyn Client>,
    default_database: String,
    bindings: DashMap<TypeId, String>,
    collections: DashMap<TypeId, Arc<dyn Collection>>,
}

impl Gateway {
    /// Create a gateway over a client.
    pub fn new(client: Arc<dyn Client>, default_database: impl Into<String>) -> Self {
        Self {
            client,
            default_database: default_database.into(),
            bindings: DashMap::new(),
            collections: DashMap::new(),
        }
    }

    /// Copy this gateway's bindings onto a different default database.
    pub fn rebased(&self, default_database: impl Into<String>) -> Self {
        let gateway = Self::new(self.client.clone(), default_database);
        for entry in self.bindings.iter() {
            gateway.bindings.insert(*entry.key(), entry.value().clone());
        }
        gateway
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Name of the default database.
    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    /// Store entities of type `T` in the named database.
    pub fn bind_database<T: Entity>(&self, database: impl Into<String>) {
        let type_id = TypeId::of::<T>();
        self.bindings.insert(type_id, database.into());
        self.collections.remove(&type_id);
    }

    /// Name of the database `T` is stored in.
    pub fn database_name_for<T: Entity>(&self) -> String {
        self.bindings
            .get(&TypeId::of::<T>())
            .map(|name| name.clone())
            .unwrap_or_else(|| self.default_database.clone())
    }

    /// Every database an entity type can resolve to: the default and each
    /// bound database, without duplicates.
    pub fn database_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        names.insert(self.default_database.clone());
        for entry in self.bindings.iter() {
            names.insert(entry.value().clone());
        }
        names.into_iter().collect()
    }

    /// Database handle for `T`.
    pub fn database_for<T: Entity>(&self) -> Arc<dyn Database> {
        self.client.database(&self.database_name_for::<T>())
    }

    /// Primary collection handle for `T`.
    pub fn collection_for<T: Entity>(&self) -> Arc<dyn Collection> {
        let type_id = TypeId::of::<T>();
        if let Some(collection) = self.collections.get(&type_id) {
            return collection.clone();
        }
        let collection = self.database_for::<T>().collection(T::COLLECTION);
        self.collections
            .entry(type_id)
            .or_insert(collection)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryClient;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Tag {
        #[serde(rename = "_id")]
        id: String,
        created_on: Option<DateTime<Utc>>,
    }

    impl Entity for Tag {
        const COLLECTION: &'static str = "Tag";

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
    }

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(MemoryClient::new()), "main")
    }

    #[test]
    fn test_default_database() {
        let gateway = gateway();
        assert_eq!(gateway.database_name_for::<Tag>(), "main");
        assert_eq!(gateway.database_for::<Tag>().name(), "main");
        assert_eq!(gateway.collection_for::<Tag>().name(), "Tag");
    }

    #[test]
    fn test_collection_handle_is_memoized() {
        let gateway = gateway();
        let first = gateway.collection_for::<Tag>();
        let second = gateway.collection_for::<Tag>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_binding_invalidates_memo() {
        let gateway = gateway();
        let before = gateway.collection_for::<Tag>();
        gateway.bind_database::<Tag>("archive");
        let after = gateway.collection_for::<Tag>();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(gateway.database_name_for::<Tag>(), "archive");
    }

    #[test]
    fn test_database_names_include_bindings_once() {
        let gateway = gateway();
        assert_eq!(gateway.database_names(), vec!["main".to_string()]);
        gateway.bind_database::<Tag>("archive");
        assert_eq!(
            gateway.database_names(),
            vec!["archive".to_string(), "main".to_string()]
        );
        gateway.bind_database::<Tag>("main");
        assert_eq!(gateway.database_names(), vec!["main".to_string()]);
    }

    #[test]
    fn test_rebased_keeps_bindings() {
        let gateway = gateway();
        gateway.bind_database::<Tag>("archive");
        let rebased = gateway.rebased("other");
        assert_eq!(rebased.default_database(), "other");
        assert_eq!(rebased.database_name_for::<Tag>(), "archive");
    }
}
