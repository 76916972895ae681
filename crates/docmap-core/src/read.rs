//! Read surface: find, count and aggregate with data filters applied.

use docmap_proto::document::from_document;
use docmap_proto::{Document, Filter, FindOptions, Stage};
use tracing::debug;

use crate::driver::{collect_cursor, SessionHandle};
use crate::entity::Entity;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::hooks::HookRegistry;

/// Executes reads for one gateway and hook registry.
pub struct Reader<'a> {
    gateway: &'a Gateway,
    hooks: &'a HookRegistry,
}

impl<'a> Reader<'a> {
    /// Create a reader.
    pub fn new(gateway: &'a Gateway, hooks: &'a HookRegistry) -> Self {
        Self { gateway, hooks }
    }

    /// Find entities matching a filter.
    pub async fn find<T: Entity>(
        &self,
        filter: Filter,
        options: FindOptions,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<T>> {
        let filter = self.hooks.filter_reads::<T>(filter);
        debug!(entity = T::COLLECTION, "find");
        let cursor = self
            .gateway
            .collection_for::<T>()
            .find(filter, options, session)
            .await?;
        collect_cursor(cursor)
            .await?
            .into_iter()
            .map(|document| Ok(from_document(document)?))
            .collect()
    }

    /// Find the first entity matching a filter.
    pub async fn find_one<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> Result<Option<T>> {
        let options = FindOptions::new().with_limit(1);
        Ok(self.find(filter, options, session).await?.into_iter().next())
    }

    /// Count entities matching a filter.
    pub async fn count<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&SessionHandle>,
    ) -> Result<u64> {
        let filter = self.hooks.filter_reads::<T>(filter);
        Ok(self
            .gateway
            .collection_for::<T>()
            .count(filter, session)
            .await?)
    }

    /// Run an aggregation pipeline over the primary collection of `T`.
    ///
    /// A registered data filter runs as a leading match stage.
    pub async fn aggregate<T: Entity>(
        &self,
        mut stages: Vec<Stage>,
        session: Option<&SessionHandle>,
    ) -> Result<Vec<Document>> {
        let filter = self.hooks.filter_reads::<T>(Filter::All);
        if filter != Filter::All {
            stages.insert(0, Stage::Match(filter));
        }
        debug!(entity = T::COLLECTION, stages = stages.len(), "aggregate");
        Ok(self
            .gateway
            .collection_for::<T>()
            .aggregate(stages, session)
            .await?)
    }
}
