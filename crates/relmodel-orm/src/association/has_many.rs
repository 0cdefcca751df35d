//! hasMany: many target rows hold the foreign key.

use super::has_one::stamp_foreign_key;
use super::{Association, Detached, SaveStrategy, key_filter};
use crate::persist::SaveOptions;
use relmodel_core::{Entity, Result, Value};

/// Save the children of every entity whose list property is dirty.
///
/// With the replace strategy, children previously linked to a persisted
/// entity but missing from its list are unlinked first; an empty list
/// unlinks them all.
pub(super) fn save(assoc: &Association, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
    let property = assoc.property_name().to_string();

    if assoc.save_strategy() == SaveStrategy::Replace {
        let target = assoc.target()?;
        let primary_key = target.primary_key();
        for parent in entities.iter() {
            if parent.is_new() || !parent.is_dirty(&property) {
                continue;
            }
            let Some(children) = parent.many(&property) else {
                continue;
            };
            let kept: Vec<Vec<Value>> = children
                .iter()
                .filter(|child| !child.is_new())
                .map(|child| child.extract(primary_key))
                .filter(|key| !key.iter().any(Value::is_null))
                .collect();
            let exclude = (!kept.is_empty()).then(|| key_filter(assoc.name(), primary_key, &kept));
            if !assoc.unlink_all(std::slice::from_ref(parent), exclude)? {
                return Ok(false);
            }
        }
    }

    let mut detached = Detached::take(entities, &property);
    if detached.is_empty() {
        return Ok(true);
    }
    stamp_foreign_key(assoc, entities, &mut detached)?;

    let saved = if detached.children.is_empty() {
        true
    } else {
        let target = assoc.target()?;
        target.save_many(&mut detached.children, &options.for_association(assoc.name()))?
    };
    detached.restore(entities, &property, saved);
    Ok(saved)
}
