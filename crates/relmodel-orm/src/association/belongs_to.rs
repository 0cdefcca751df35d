//! belongsTo: the source row holds the foreign key.

use super::{Association, Detached};
use crate::persist::SaveOptions;
use relmodel_core::{Entity, Result};

/// Save the parents stored under the association property before the
/// entities themselves, then copy each parent's binding key into the
/// entity's foreign key.
pub(super) fn save(assoc: &Association, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
    let property = assoc.property_name().to_string();
    let mut detached = Detached::take(entities, &property);
    if detached.is_empty() {
        return Ok(true);
    }

    let target = assoc.target()?;
    let saved = target.save_many(&mut detached.children, &options.for_association(assoc.name()))?;
    if saved {
        let foreign_key = assoc.foreign_key();
        let binding_key = assoc.binding_key()?;
        for (&owner, parent) in detached.owners.iter().zip(&detached.children) {
            for (col, value) in foreign_key.iter().zip(parent.extract(binding_key)) {
                entities[owner].set(col.clone(), value);
            }
        }
    } else {
        tracing::debug!(association = assoc.name(), "Parent save failed");
    }
    detached.restore(entities, &property, saved);
    Ok(saved)
}
