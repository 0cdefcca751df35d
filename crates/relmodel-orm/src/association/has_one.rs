//! hasOne: a single target row holds the foreign key.

use super::{Association, Detached};
use crate::persist::SaveOptions;
use relmodel_core::{Entity, Result};

/// Stamp each entity's binding key onto its child and save the children.
pub(super) fn save(assoc: &Association, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
    let property = assoc.property_name().to_string();
    let mut detached = Detached::take(entities, &property);
    if detached.is_empty() {
        return Ok(true);
    }

    stamp_foreign_key(assoc, entities, &mut detached)?;
    let target = assoc.target()?;
    let saved = target.save_many(&mut detached.children, &options.for_association(assoc.name()))?;
    detached.restore(entities, &property, saved);
    Ok(saved)
}

/// Copy the owner's binding key into the foreign key of every detached child.
pub(super) fn stamp_foreign_key(
    assoc: &Association,
    owners: &[Entity],
    detached: &mut Detached,
) -> Result<()> {
    let foreign_key = assoc.foreign_key();
    let binding_key = assoc.binding_key()?;
    for (&owner, child) in detached.owners.iter().zip(detached.children.iter_mut()) {
        for (col, value) in foreign_key.iter().zip(owners[owner].extract(binding_key)) {
            child.set(col.clone(), value);
        }
    }
    Ok(())
}
