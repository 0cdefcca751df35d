//! Table lifecycle hooks.

use crate::persist::{DeleteOptions, SaveOptions};
use crate::query::Query;
use relmodel_core::Entity;

/// Callbacks invoked around finds, saves and deletes of one table.
///
/// Every method has a no-op default, so implementors override only the
/// events they care about. Returning `false` from a `before_*` hook aborts
/// the operation; inside an atomic save or delete the transaction is rolled
/// back.
pub trait TableListener: Send + Sync {
    /// Called once per query, right before it is compiled.
    fn before_find(&self, _query: &mut Query) {}

    /// Called before an entity is validated and written.
    fn before_save(&self, _entity: &mut Entity, _options: &SaveOptions) -> bool {
        true
    }

    /// Called after the entity and its associations were written.
    fn after_save(&self, _entity: &mut Entity, _options: &SaveOptions) {}

    /// Called before an entity and its dependents are deleted.
    fn before_delete(&self, _entity: &Entity, _options: &DeleteOptions) -> bool {
        true
    }

    /// Called after the row was deleted.
    fn after_delete(&self, _entity: &Entity, _options: &DeleteOptions) {}
}
