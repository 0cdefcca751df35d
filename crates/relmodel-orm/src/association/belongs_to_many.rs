//! belongsToMany: source and target rows linked through a junction table.
//!
//! Saving writes the targets first and then one junction row per
//! (source, target) pair. A target carrying a `_joinData` entity or JSON
//! object contributes its extra junction columns.

use super::{Association, AssociationKind, Detached, collect_keys, key_filter};
use crate::persist::{Associated, SaveOptions};
use relmodel_core::{Entity, Error, JOIN_DATA, Key, Property, Result, Value, key_of};
use std::collections::BTreeSet;

/// Save targets and their junction rows for every entity whose list
/// property is dirty.
///
/// `replace` removes the existing junction rows of persisted entities
/// first; otherwise pairs that are already linked are skipped.
pub(super) fn save_links(
    assoc: &Association,
    entities: &mut [Entity],
    options: &SaveOptions,
    replace: bool,
) -> Result<bool> {
    let property = assoc.property_name().to_string();

    if replace {
        let link = assoc.junction_association()?;
        for parent in entities.iter() {
            if parent.is_new() || !parent.is_dirty(&property) || parent.many(&property).is_none() {
                continue;
            }
            if !link.unlink_all(std::slice::from_ref(parent), None)? {
                return Ok(false);
            }
        }
    }

    let mut detached = Detached::take(entities, &property);
    if detached.is_empty() {
        return Ok(true);
    }

    let target = assoc.target()?;
    if !detached.children.is_empty()
        && !target.save_many(&mut detached.children, &options.for_association(assoc.name()))?
    {
        detached.restore(entities, &property, false);
        return Ok(false);
    }

    let junction = assoc.junction()?;
    let binding_key = assoc.binding_key()?;
    let foreign_key = assoc.foreign_key();
    let target_foreign_key = assoc.target_foreign_key();
    let target_key = target.primary_key();

    let existing = if replace {
        BTreeSet::new()
    } else {
        existing_links(assoc, entities)?
    };

    let mut rows = Vec::new();
    let mut positions = Vec::new();
    for (index, (&owner, linked)) in detached.owners.iter().zip(&detached.children).enumerate() {
        let source_values = entities[owner].extract(binding_key);
        let target_values = linked.extract(target_key);
        if let (Some(source), Some(target)) = (key_of(&source_values), key_of(&target_values)) {
            if existing.contains(&(source, target)) {
                tracing::trace!("Already linked, skipping junction row");
                continue;
            }
        }
        let mut row = junction_row(linked);
        for (col, value) in foreign_key.iter().zip(source_values) {
            row.set(col.clone(), value);
        }
        for (col, value) in target_foreign_key.iter().zip(target_values) {
            row.set(col.clone(), value);
        }
        rows.push(row);
        positions.push(index);
    }

    let junction_options = SaveOptions {
        atomic: false,
        check_rules: options.check_rules,
        associated: Associated::None,
    };
    let linked = junction.save_many(&mut rows, &junction_options)?;
    if linked {
        for (row, index) in rows.into_iter().zip(positions) {
            let child = &mut detached.children[index];
            child.set_one(JOIN_DATA, row);
            child.set_dirty(JOIN_DATA, false);
        }
    }
    tracing::debug!(association = assoc.name(), linked, "Junction rows saved");
    detached.restore(entities, &property, linked);
    Ok(linked)
}

/// The junction row for one target: a copy of its `_joinData`, or a fresh
/// entity.
fn junction_row(target: &Entity) -> Entity {
    match target.get(JOIN_DATA) {
        Some(Property::One(data)) => {
            let mut row = (**data).clone();
            row.set_new(true);
            row
        }
        Some(Property::Value(Value::Json(serde_json::Value::Object(map)))) => {
            Entity::from_values(map.iter().map(|(k, v)| (k.clone(), json_scalar(v))))
        }
        _ => Entity::new(),
    }
}

fn json_scalar(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::BigInt)
            .or_else(|| n.as_f64().map(Value::Double))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Json(other.clone()),
    }
}

/// (source key, target key) pairs already present in the junction table
/// for `entities`.
fn existing_links(assoc: &Association, entities: &[Entity]) -> Result<BTreeSet<(Key, Key)>> {
    let keys = collect_keys(entities.iter().filter(|e| !e.is_new()), assoc.binding_key()?);
    if keys.is_empty() {
        return Ok(BTreeSet::new());
    }
    let junction = assoc.junction()?;
    let foreign_key = assoc.foreign_key();
    let target_foreign_key = assoc.target_foreign_key();
    let rows = junction
        .find()
        .where_(key_filter(junction.alias(), foreign_key, &keys))
        .all()?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            Some((
                row.extract_key(foreign_key)?,
                row.extract_key(target_foreign_key)?,
            ))
        })
        .collect())
}

fn require_persisted(assoc: &Association, source: &Entity) -> Result<()> {
    if assoc.kind() != AssociationKind::BelongsToMany {
        return Err(Error::Custom(format!(
            "association `{}` is a {}; links need a belongsToMany",
            assoc.name(),
            assoc.kind()
        )));
    }
    if source.is_new() {
        return Err(Error::Custom(format!(
            "cannot link `{}` rows to an unsaved entity",
            assoc.name()
        )));
    }
    Ok(())
}

/// Add links, keeping the ones that exist.
pub(super) fn link(assoc: &Association, source: &mut Entity, targets: Vec<Entity>) -> Result<bool> {
    require_persisted(assoc, source)?;
    let property = assoc.property_name().to_string();
    let loaded = source.take(&property);
    source.set_many(property.clone(), targets);

    let registry = assoc.target()?.registry()?;
    let options = SaveOptions {
        atomic: false,
        ..SaveOptions::default()
    };
    let linked = registry.datasource().transactional(|| {
        save_links(assoc, std::slice::from_mut(source), &options, false)
    })?;

    if let Some(Property::Many(mut previous)) = loaded {
        let target_key = assoc.target()?.primary_key().to_vec();
        let known: BTreeSet<Key> = previous
            .iter()
            .filter_map(|e| e.extract_key(&target_key))
            .collect();
        if let Some(Property::Many(added)) = source.take(&property) {
            previous.extend(
                added
                    .into_iter()
                    .filter(|e| e.extract_key(&target_key).is_none_or(|k| !known.contains(&k))),
            );
        }
        source.set_many(property.clone(), previous);
    }
    source.set_dirty(&property, !linked);
    Ok(linked)
}

/// Remove the links between `source` and `targets`. Loaded targets are
/// removed from the source's property as well.
pub(super) fn unlink(assoc: &Association, source: &mut Entity, targets: &[Entity]) -> Result<bool> {
    require_persisted(assoc, source)?;
    let target = assoc.target()?;
    let junction = assoc.junction()?;
    let target_key = target.primary_key().to_vec();
    let target_keys = collect_keys(targets.iter(), &target_key);
    if target_keys.is_empty() {
        return Ok(true);
    }

    let source_values = source.extract(assoc.binding_key()?);
    let condition = key_filter(junction.alias(), assoc.foreign_key(), &[source_values])
        .and(key_filter(junction.alias(), assoc.target_foreign_key(), &target_keys));
    let link = assoc.junction_association()?;

    let registry = target.registry()?;
    let unlinked = registry.datasource().transactional(|| {
        let mut rows = junction.find().where_(condition).all()?;
        let options = crate::persist::DeleteOptions {
            atomic: false,
            check_rules: false,
            callbacks: link.cascade_callbacks(),
        };
        for row in &mut rows {
            if !junction.delete(row, &options)? {
                return Ok(false);
            }
        }
        Ok(true)
    })?;

    if unlinked {
        let removed: BTreeSet<Key> = target_keys.iter().filter_map(|k| key_of(k)).collect();
        let property = assoc.property_name();
        if let Some(list) = source.many_mut(property) {
            list.retain(|e| e.extract_key(&target_key).is_none_or(|k| !removed.contains(&k)));
            source.set_dirty(property, false);
        }
    }
    Ok(unlinked)
}

/// Make `targets` the complete set of linked rows.
pub(super) fn replace_links(
    assoc: &Association,
    source: &mut Entity,
    targets: Vec<Entity>,
) -> Result<bool> {
    require_persisted(assoc, source)?;
    let property = assoc.property_name().to_string();
    source.set_many(property, targets);

    let registry = assoc.target()?.registry()?;
    let options = SaveOptions {
        atomic: false,
        ..SaveOptions::default()
    };
    registry.datasource().transactional(|| {
        save_links(assoc, std::slice::from_mut(source), &options, true)
    })
}
