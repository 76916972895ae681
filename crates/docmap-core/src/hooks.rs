//! Save interceptors and data filters.
//!
//! A hook declares the single entity type it targets through its associated
//! `Target` type. The registry keys hooks by that type, holds at most one
//! interceptor and one filter per type, and replaces on re-registration.
//!
//! Registries are injectable: [`HookRegistry::global`] serves the default
//! [`Db`](crate::Db), and tests build isolated registries with
//! [`HookRegistry::new`].

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use docmap_proto::Filter;
use tracing::debug;

use crate::entity::Entity;
use crate::error::{Error, Result};

/// Mutates an entity immediately before every write.
pub trait SaveInterceptor: Send + Sync + 'static {
    /// Entity type this interceptor targets.
    type Target: Entity;

    /// Mutate the entity.
    fn apply(&self, entity: &mut Self::Target);
}

/// Augments read filters for one entity type.
pub trait DataFilter: Send + Sync + 'static {
    /// Entity type this filter targets.
    type Target: Entity;

    /// Return the filter to run instead of `filter`.
    fn apply(&self, filter: Filter) -> Filter;
}

/// The entity type a hook targets, with the capabilities it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookTarget {
    /// Type identity used as the registry key.
    pub type_id: TypeId,
    /// Rust type name, for diagnostics.
    pub type_name: &'static str,
    /// Collection the type is stored in.
    pub collection: &'static str,
    /// Whether the type opts into save interception.
    pub save_intercepted: bool,
    /// Whether the type opts into read filtering.
    pub data_filtered: bool,
}

impl HookTarget {
    /// Describe an entity type.
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            collection: T::COLLECTION,
            save_intercepted: T::SAVE_INTERCEPTED,
            data_filtered: T::DATA_FILTERED,
        }
    }
}

/// Type-erased save interceptor.
pub trait DynSaveInterceptor: Send + Sync {
    /// The declared target type. `None` means the hook names no target.
    fn target(&self) -> Option<HookTarget>;

    /// Apply to an entity of the target type. Other types are ignored.
    fn apply_any(&self, entity: &mut dyn Any);
}

impl<I: SaveInterceptor> DynSaveInterceptor for I {
    fn target(&self) -> Option<HookTarget> {
        Some(HookTarget::of::<I::Target>())
    }

    fn apply_any(&self, entity: &mut dyn Any) {
        if let Some(entity) = entity.downcast_mut::<I::Target>() {
            self.apply(entity);
        }
    }
}

/// Type-erased data filter.
pub trait DynDataFilter: Send + Sync {
    /// The declared target type. `None` means the hook names no target.
    fn target(&self) -> Option<HookTarget>;

    /// Rewrite a read filter.
    fn apply_filter(&self, filter: Filter) -> Filter;
}

impl<F: DataFilter> DynDataFilter for F {
    fn target(&self) -> Option<HookTarget> {
        Some(HookTarget::of::<F::Target>())
    }

    fn apply_filter(&self, filter: Filter) -> Filter {
        self.apply(filter)
    }
}

/// A data filter that ANDs a fixed predicate into every read.
pub struct PredicateFilter<T> {
    predicate: Filter,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> PredicateFilter<T> {
    /// Create a filter from a predicate.
    pub fn new(predicate: Filter) -> Self {
        Self {
            predicate,
            _target: PhantomData,
        }
    }

    /// The predicate added to reads.
    pub fn predicate(&self) -> &Filter {
        &self.predicate
    }
}

impl<T: Entity> DataFilter for PredicateFilter<T> {
    type Target = T;

    fn apply(&self, filter: Filter) -> Filter {
        filter.and(self.predicate.clone())
    }
}

impl<T> fmt::Debug for PredicateFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateFilter")
            .field("predicate", &self.predicate)
            .finish()
    }
}

struct Registered<H: ?Sized> {
    target: HookTarget,
    hook: Arc<H>,
}

/// Concurrent registry of save interceptors and data filters.
pub struct HookRegistry {
    interceptors: DashMap<TypeId, Registered<dyn DynSaveInterceptor>>,
    filters: DashMap<TypeId, Registered<dyn DynDataFilter>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<HookRegistry>> = OnceLock::new();

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            interceptors: DashMap::new(),
            filters: DashMap::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<HookRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(HookRegistry::new()))
            .clone()
    }

    /// Register a save interceptor, replacing any previous one for its target.
    pub fn register_save_interceptor<I: SaveInterceptor>(&self, interceptor: I) -> Result<()> {
        self.register_save_interceptor_dyn(Arc::new(interceptor))
    }

    /// Register a type-erased save interceptor.
    ///
    /// Fails with [`Error::Configuration`] if the hook declares no target or
    /// the target type does not opt into interception.
    pub fn register_save_interceptor_dyn(
        &self,
        interceptor: Arc<dyn DynSaveInterceptor>,
    ) -> Result<()> {
        let target = interceptor.target().ok_or_else(|| {
            Error::Configuration("save interceptors must declare exactly one target entity type".into())
        })?;
        if !target.save_intercepted {
            return Err(Error::Configuration(format!(
                "{} does not opt into save interception",
                target.type_name
            )));
        }

        debug!(target_type = target.type_name, "registering save interceptor");
        self.interceptors.insert(
            target.type_id,
            Registered {
                target,
                hook: interceptor,
            },
        );
        Ok(())
    }

    /// Register a data filter, replacing any previous one for its target.
    pub fn register_data_filter<F: DataFilter>(&self, filter: F) -> Result<()> {
        self.register_data_filter_dyn(Arc::new(filter))
    }

    /// Register a type-erased data filter.
    ///
    /// Fails with [`Error::Configuration`] if the hook declares no target or
    /// the target type does not opt into read filtering.
    pub fn register_data_filter_dyn(&self, filter: Arc<dyn DynDataFilter>) -> Result<()> {
        let target = filter.target().ok_or_else(|| {
            Error::Configuration("data filters must declare exactly one target entity type".into())
        })?;
        if !target.data_filtered {
            return Err(Error::Configuration(format!(
                "{} does not opt into data filtering",
                target.type_name
            )));
        }

        debug!(target_type = target.type_name, "registering data filter");
        self.filters.insert(
            target.type_id,
            Registered {
                target,
                hook: filter,
            },
        );
        Ok(())
    }

    /// The interceptor registered for `T`.
    pub fn interceptor_for<T: Entity>(&self) -> Option<Arc<dyn DynSaveInterceptor>> {
        self.interceptors
            .get(&TypeId::of::<T>())
            .map(|entry| entry.hook.clone())
    }

    /// The data filter registered for `T`.
    pub fn filter_for<T: Entity>(&self) -> Option<Arc<dyn DynDataFilter>> {
        self.filters
            .get(&TypeId::of::<T>())
            .map(|entry| entry.hook.clone())
    }

    /// Targets that currently have a save interceptor.
    pub fn save_interceptors(&self) -> Vec<HookTarget> {
        self.interceptors.iter().map(|entry| entry.target).collect()
    }

    /// Targets that currently have a data filter.
    pub fn data_filters(&self) -> Vec<HookTarget> {
        self.filters.iter().map(|entry| entry.target).collect()
    }

    /// Run the interceptor for `T` on an entity, if the type opts in.
    pub fn intercept<T: Entity>(&self, entity: &mut T) {
        if !T::SAVE_INTERCEPTED {
            return;
        }
        if let Some(interceptor) = self.interceptor_for::<T>() {
            interceptor.apply_any(entity);
        }
    }

    /// Apply the data filter for `T` to a read filter, if the type opts in.
    pub fn filter_reads<T: Entity>(&self, filter: Filter) -> Filter {
        if !T::DATA_FILTERED {
            return filter;
        }
        match self.filter_for::<T>() {
            Some(data_filter) => data_filter.apply_filter(filter),
            None => filter,
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("interceptors", &self.interceptors.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}
