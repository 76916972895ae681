//! Pre-write normalization of entities.

use chrono::Utc;

use crate::entity::Entity;
use crate::hooks::HookRegistry;

/// Normalize an entity immediately before a write.
///
/// Runs the registered interceptor (types with `SAVE_INTERCEPTED` only),
/// assigns identity and creation time when the identity is empty, then
/// stamps the modification time. An existing identity is never replaced.
pub fn prepare_for_save<T: Entity>(entity: &mut T, hooks: &HookRegistry) {
    hooks.intercept(entity);

    let now = Utc::now();
    if entity.id().is_empty() {
        let id = entity.generate_new_id();
        entity.set_id(id);
        entity.set_created_on(now);
    }

    if T::MODIFIED_ON_FIELD.is_some() {
        entity.set_modified_on(now);
    }
}
