//! Save engine: full upserts and partial-field upserts.
//!
//! Every variant first runs the entity through
//! [`prepare_for_save`](crate::lifecycle::prepare_for_save), so identity,
//! timestamps and interceptors apply regardless of which save is used.

use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use dashmap::DashMap;
use docmap_proto::document::to_document;
use docmap_proto::{
    BulkWriteResult, Document, Filter, ReplaceOneResult, Update, UpdateOp, UpdateResult,
    WriteModel, ID_FIELD,
};
use tracing::debug;

use crate::driver::SessionHandle;
use crate::entity::{Entity, Preservation};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::hooks::HookRegistry;
use crate::lifecycle::prepare_for_save;

/// Filter selecting a document by identity.
pub fn id_filter(id: &str) -> Filter {
    Filter::eq(ID_FIELD, id)
}

/// Which root-level fields a partial save writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePlan {
    /// Write only these fields (plus the modification time).
    Only(BTreeSet<String>),
    /// Write every field except these.
    Except(BTreeSet<String>),
}

impl SavePlan {
    /// Plan that writes only the listed fields.
    pub fn only(fields: &[&str]) -> Result<Self> {
        Ok(SavePlan::Only(validate_fields(fields)?))
    }

    /// Plan that writes every field except the listed ones.
    pub fn except(fields: &[&str]) -> Result<Self> {
        Ok(SavePlan::Except(validate_fields(fields)?))
    }

    /// Build the update for a prepared entity document.
    ///
    /// The modification-time field is written with the server clock unless
    /// the plan excludes it. Every listed field must be a root key of the
    /// document.
    pub fn build_update<T: Entity>(&self, document: &Document) -> Result<Update> {
        let listed = match self {
            SavePlan::Only(fields) | SavePlan::Except(fields) => fields,
        };
        if let Some(unknown) = listed.iter().find(|field| !document.contains_key(*field)) {
            return Err(Error::Argument(format!(
                "{} has no field {:?}",
                T::COLLECTION,
                unknown
            )));
        }

        let modified_on = T::MODIFIED_ON_FIELD;
        let mut ops = Vec::new();

        for (field, value) in document {
            if field == ID_FIELD {
                continue;
            }
            let selected = match self {
                SavePlan::Only(fields) => {
                    fields.contains(field) || Some(field.as_str()) == modified_on
                }
                SavePlan::Except(fields) => !fields.contains(field),
            };
            if !selected {
                continue;
            }
            if Some(field.as_str()) == modified_on {
                ops.push(UpdateOp::current_date(field.as_str()));
            } else {
                ops.push(UpdateOp::set(field.as_str(), value.clone()));
            }
        }

        if ops.is_empty() {
            return Err(Error::Argument(format!(
                "no fields of {} left to write",
                T::COLLECTION
            )));
        }
        Ok(Update::combine(ops))
    }
}

fn validate_fields(fields: &[&str]) -> Result<BTreeSet<String>> {
    if fields.is_empty() {
        return Err(Error::Argument(
            "a partial save needs at least one field name".into(),
        ));
    }
    let mut set = BTreeSet::new();
    for field in fields {
        if field.is_empty() || field.contains('.') {
            return Err(Error::Argument(format!(
                "only root-level fields can be saved partially, got {:?}",
                field
            )));
        }
        set.insert((*field).to_string());
    }
    Ok(set)
}

/// A type's preserve / don't-preserve declaration, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PreservationRule {
    /// No field is annotated.
    Unannotated,
    /// Keep these fields, write the rest.
    Preserve(BTreeSet<&'static str>),
    /// Write only these fields, keep the rest.
    WriteOnly(BTreeSet<&'static str>),
    /// Both kinds of annotation are present.
    Conflict,
}

impl PreservationRule {
    fn resolve(table: &[(&'static str, Preservation)]) -> Self {
        let preserve: BTreeSet<_> = table
            .iter()
            .filter(|(_, kind)| *kind == Preservation::Preserve)
            .map(|(field, _)| *field)
            .collect();
        let dont_preserve: BTreeSet<_> = table
            .iter()
            .filter(|(_, kind)| *kind == Preservation::DontPreserve)
            .map(|(field, _)| *field)
            .collect();

        match (preserve.is_empty(), dont_preserve.is_empty()) {
            (true, true) => PreservationRule::Unannotated,
            (false, true) => PreservationRule::Preserve(preserve),
            (true, false) => PreservationRule::WriteOnly(dont_preserve),
            (false, false) => PreservationRule::Conflict,
        }
    }

    fn for_type<T: Entity>() -> Self {
        static RULES: OnceLock<DashMap<TypeId, PreservationRule>> = OnceLock::new();
        let rules = RULES.get_or_init(DashMap::new);
        rules
            .entry(TypeId::of::<T>())
            .or_insert_with(|| PreservationRule::resolve(T::field_preservation()))
            .clone()
    }

    /// Fields of `document` the rule keeps untouched.
    fn preserved_fields(&self, document: &Document) -> BTreeSet<String> {
        let updatable = document.keys().filter(|k| k.as_str() != ID_FIELD);
        match self {
            PreservationRule::Preserve(fields) => updatable
                .filter(|k| fields.contains(k.as_str()))
                .cloned()
                .collect(),
            PreservationRule::WriteOnly(fields) => updatable
                .filter(|k| !fields.contains(k.as_str()))
                .cloned()
                .collect(),
            PreservationRule::Unannotated | PreservationRule::Conflict => BTreeSet::new(),
        }
    }
}

/// Executes save operations for one gateway and hook registry.
pub struct SaveEngine<'a> {
    gateway: &'a Gateway,
    hooks: &'a HookRegistry,
}

impl<'a> SaveEngine<'a> {
    /// Create a save engine.
    pub fn new(gateway: &'a Gateway, hooks: &'a HookRegistry) -> Self {
        Self { gateway, hooks }
    }

    /// Replace-or-insert a whole entity by identity.
    pub async fn save<T: Entity>(
        &self,
        entity: &mut T,
        session: Option<&SessionHandle>,
    ) -> Result<ReplaceOneResult> {
        prepare_for_save(entity, self.hooks);
        let document = to_document(entity)?;

        debug!(entity = T::COLLECTION, id = entity.id(), "saving entity");
        let result = self
            .gateway
            .collection_for::<T>()
            .replace_one(id_filter(entity.id()), document, true, session)
            .await?;
        Ok(result)
    }

    /// Replace-or-insert a batch of entities as one unordered bulk write.
    ///
    /// Per-item failures are reported in the result, not as an error.
    pub async fn save_many<T: Entity>(
        &self,
        entities: &mut [T],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        let mut models = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            prepare_for_save(entity, self.hooks);
            models.push(WriteModel::replace_upsert(
                id_filter(entity.id()),
                to_document(entity)?,
            ));
        }
        self.bulk::<T>(models, session).await
    }

    /// Upsert only the listed root-level fields.
    pub async fn save_only<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        let plan = SavePlan::only(fields)?;
        self.save_partial(entity, &plan, session).await
    }

    /// Upsert every root-level field except the listed ones.
    pub async fn save_except<T: Entity>(
        &self,
        entity: &mut T,
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        let plan = SavePlan::except(fields)?;
        self.save_partial(entity, &plan, session).await
    }

    /// Batch form of [`save_only`](Self::save_only).
    pub async fn save_only_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        let plan = SavePlan::only(fields)?;
        self.save_partial_many(entities, &plan, session).await
    }

    /// Batch form of [`save_except`](Self::save_except).
    pub async fn save_except_many<T: Entity>(
        &self,
        entities: &mut [T],
        fields: &[&str],
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        let plan = SavePlan::except(fields)?;
        self.save_partial_many(entities, &plan, session).await
    }

    /// Upsert the fields the type's preservation table does not preserve.
    pub async fn save_preserving<T: Entity>(
        &self,
        entity: &mut T,
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        let rule = PreservationRule::for_type::<T>();
        match rule {
            PreservationRule::Conflict => {
                return Err(Error::Configuration(format!(
                    "{} declares both preserved and non-preserved fields",
                    T::COLLECTION
                )))
            }
            PreservationRule::Unannotated => {
                return Err(Error::Argument(format!(
                    "no fields of {} are preserved, use save instead",
                    T::COLLECTION
                )))
            }
            PreservationRule::Preserve(_) | PreservationRule::WriteOnly(_) => {}
        }

        prepare_for_save(entity, self.hooks);
        let document = to_document(entity)?;

        let preserved = rule.preserved_fields(&document);
        if preserved.is_empty() {
            return Err(Error::Argument(format!(
                "no fields of {} are preserved, use save instead",
                T::COLLECTION
            )));
        }
        let written = document
            .keys()
            .filter(|k| k.as_str() != ID_FIELD && !preserved.contains(k.as_str()))
            .count();
        if written == 0 {
            return Err(Error::Argument(format!(
                "at least one field of {} must not be preserved",
                T::COLLECTION
            )));
        }

        let update = SavePlan::Except(preserved).build_update::<T>(&document)?;
        debug!(
            entity = T::COLLECTION,
            id = entity.id(),
            fields = update.len(),
            "saving entity preserving fields"
        );
        let result = self
            .gateway
            .collection_for::<T>()
            .update_one(id_filter(entity.id()), update, true, session)
            .await?;
        Ok(result)
    }

    async fn save_partial<T: Entity>(
        &self,
        entity: &mut T,
        plan: &SavePlan,
        session: Option<&SessionHandle>,
    ) -> Result<UpdateResult> {
        prepare_for_save(entity, self.hooks);
        let document = to_document(entity)?;
        let update = plan.build_update::<T>(&document)?;

        debug!(
            entity = T::COLLECTION,
            id = entity.id(),
            fields = update.len(),
            "saving entity partially"
        );
        let result = self
            .gateway
            .collection_for::<T>()
            .update_one(id_filter(entity.id()), update, true, session)
            .await?;
        Ok(result)
    }

    async fn save_partial_many<T: Entity>(
        &self,
        entities: &mut [T],
        plan: &SavePlan,
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        let mut models = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            prepare_for_save(entity, self.hooks);
            let document = to_document(entity)?;
            let update = plan.build_update::<T>(&document)?;
            models.push(WriteModel::update_upsert(id_filter(entity.id()), update));
        }
        self.bulk::<T>(models, session).await
    }

    async fn bulk<T: Entity>(
        &self,
        models: Vec<WriteModel>,
        session: Option<&SessionHandle>,
    ) -> Result<BulkWriteResult> {
        if models.is_empty() {
            return Ok(BulkWriteResult::new(0));
        }

        debug!(entity = T::COLLECTION, models = models.len(), "bulk saving entities");
        let result = self
            .gateway
            .collection_for::<T>()
            .bulk_write(models, false, session)
            .await?;
        if !result.is_ok() {
            debug!(
                entity = T::COLLECTION,
                failed = result.write_errors.len(),
                "bulk save finished with item failures"
            );
        }
        Ok(result)
    }
}
