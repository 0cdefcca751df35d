//! Dynamic records with dirty tracking.
//!
//! An [`Entity`] is one row of one table plus whatever associated rows were
//! attached to it. Scalar columns are stored as [`Value`]s; associations are
//! stored as a nested entity (`Property::One`) or a list (`Property::Many`).
//! A null single association is `Property::Value(Value::Null)`.
//!
//! Entities built by user code start out new with every assigned field dirty.
//! Entities built from query results go through [`Entity::hydrate`], which
//! marks them clean and not new.

use crate::value::{Key, Value, key_of};
use serde_json::Map;
use std::collections::{BTreeMap, BTreeSet};

/// Property holding the junction row of a many-to-many link.
pub const JOIN_DATA: &str = "_joinData";

/// Property name under which matching rows are reported.
pub const MATCHING_DATA: &str = "_matchingData";

/// One entity property.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// A scalar column value, or NULL for an absent single association
    Value(Value),
    /// A single associated entity
    One(Box<Entity>),
    /// A list of associated entities
    Many(Vec<Entity>),
}

impl Property {
    /// The scalar value, if this property holds one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The single associated entity, if this property holds one.
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Property::One(e) => Some(e),
            _ => None,
        }
    }

    /// The associated list, if this property holds one.
    pub fn as_many(&self) -> Option<&[Entity]> {
        match self {
            Property::Many(list) => Some(list),
            _ => None,
        }
    }

    /// Whether this property is null or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Property::Value(v) => v.is_null(),
            Property::One(_) => false,
            Property::Many(list) => list.is_empty(),
        }
    }
}

impl From<Value> for Property {
    fn from(v: Value) -> Self {
        Property::Value(v)
    }
}

impl From<Entity> for Property {
    fn from(e: Entity) -> Self {
        Property::One(Box::new(e))
    }
}

impl From<Vec<Entity>> for Property {
    fn from(list: Vec<Entity>) -> Self {
        Property::Many(list)
    }
}

/// A dynamically-typed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    source: Option<String>,
    fields: BTreeMap<String, Property>,
    dirty: BTreeSet<String>,
    new: bool,
    errors: BTreeMap<String, Vec<String>>,
    matching: BTreeMap<String, Entity>,
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity {
    /// Create an empty new entity.
    pub fn new() -> Self {
        Self {
            source: None,
            fields: BTreeMap::new(),
            dirty: BTreeSet::new(),
            new: true,
            errors: BTreeMap::new(),
            matching: BTreeMap::new(),
        }
    }

    /// Create a new entity from `(field, value)` pairs. Every field is dirty.
    pub fn from_values<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entity = Self::new();
        for (k, v) in values {
            entity.set(k, v);
        }
        entity
    }

    /// Build an entity from database data: clean, not new.
    pub fn hydrate(source: impl Into<String>, fields: BTreeMap<String, Property>) -> Self {
        Self {
            source: Some(source.into()),
            fields,
            dirty: BTreeSet::new(),
            new: false,
            errors: BTreeMap::new(),
            matching: BTreeMap::new(),
        }
    }

    /// Alias of the table this entity belongs to, if known.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Set the source table alias.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    // ==================== Field access ====================

    /// Get a property.
    pub fn get(&self, field: &str) -> Option<&Property> {
        self.fields.get(field)
    }

    /// Get a mutable property. Does not mark the field dirty.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Property> {
        self.fields.get_mut(field)
    }

    /// Get a scalar value. Missing fields and associations return `None`.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.get(field).and_then(Property::as_value)
    }

    /// Get a scalar value, treating a missing field as NULL.
    pub fn value_or_null(&self, field: &str) -> Value {
        self.value(field).cloned().unwrap_or(Value::Null)
    }

    /// Get a single associated entity.
    pub fn one(&self, field: &str) -> Option<&Entity> {
        self.get(field).and_then(Property::as_one)
    }

    /// Get a mutable single associated entity.
    pub fn one_mut(&mut self, field: &str) -> Option<&mut Entity> {
        match self.fields.get_mut(field) {
            Some(Property::One(e)) => Some(e),
            _ => None,
        }
    }

    /// Get an associated list.
    pub fn many(&self, field: &str) -> Option<&[Entity]> {
        self.get(field).and_then(Property::as_many)
    }

    /// Get a mutable associated list.
    pub fn many_mut(&mut self, field: &str) -> Option<&mut Vec<Entity>> {
        match self.fields.get_mut(field) {
            Some(Property::Many(list)) => Some(list),
            _ => None,
        }
    }

    /// Whether the field is present (NULL counts as present).
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Names of all present fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Set a scalar value; the field becomes dirty if its value changed.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.set_property(field, Property::Value(value.into()))
    }

    /// Set a single associated entity; the field becomes dirty.
    pub fn set_one(&mut self, field: impl Into<String>, entity: Entity) -> &mut Self {
        self.set_property(field, Property::One(Box::new(entity)))
    }

    /// Set an associated list; the field becomes dirty.
    pub fn set_many(&mut self, field: impl Into<String>, entities: Vec<Entity>) -> &mut Self {
        self.set_property(field, Property::Many(entities))
    }

    /// Set any property; the field becomes dirty if it changed.
    pub fn set_property(&mut self, field: impl Into<String>, property: Property) -> &mut Self {
        let field = field.into();
        let changed = match (&property, self.fields.get(&field)) {
            (Property::Value(new), Some(Property::Value(old))) => new != old,
            _ => true,
        };
        if changed {
            self.dirty.insert(field.clone());
        }
        self.fields.insert(field, property);
        self
    }

    /// Remove a field and return its value.
    pub fn take(&mut self, field: &str) -> Option<Property> {
        self.dirty.remove(field);
        self.fields.remove(field)
    }

    /// Extract values for the given fields; missing fields become NULL.
    pub fn extract(&self, fields: &[String]) -> Vec<Value> {
        fields.iter().map(|f| self.value_or_null(f)).collect()
    }

    /// Extract a normalized key. `None` if any part is missing or NULL.
    pub fn extract_key(&self, fields: &[String]) -> Option<Key> {
        if fields.is_empty() {
            return None;
        }
        key_of(&self.extract(fields))
    }

    // ==================== State ====================

    /// Whether the entity has never been persisted.
    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Set the new flag. Marking an entity new marks every field dirty.
    pub fn set_new(&mut self, new: bool) -> &mut Self {
        if new {
            self.dirty = self.fields.keys().cloned().collect();
        }
        self.new = new;
        self
    }

    /// Whether a field has unsaved changes.
    pub fn is_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    /// Whether any field has unsaved changes.
    pub fn is_any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Set or clear the dirty flag of one field.
    pub fn set_dirty(&mut self, field: &str, dirty: bool) -> &mut Self {
        if dirty {
            self.dirty.insert(field.to_string());
        } else {
            self.dirty.remove(field);
        }
        self
    }

    /// Dirty field names.
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Clear dirty flags and errors.
    pub fn clean(&mut self) {
        self.dirty.clear();
        self.errors.clear();
    }

    // ==================== Errors ====================

    /// Attach an error message to a field.
    pub fn set_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Error messages for one field.
    pub fn errors(&self, field: &str) -> &[String] {
        self.errors.get(field).map_or(&[], Vec::as_slice)
    }

    /// All error messages, grouped by field.
    pub fn all_errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// Whether any error is attached.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    // ==================== Matching data ====================

    /// Record the row matched through `alias` by a `matching` filter.
    pub fn set_matching(&mut self, alias: impl Into<String>, entity: Entity) {
        self.matching.insert(alias.into(), entity);
    }

    /// The row matched through `alias`, if any.
    pub fn matching(&self, alias: &str) -> Option<&Entity> {
        self.matching.get(alias)
    }

    /// Remove and return the row matched through `alias`.
    pub fn take_matching(&mut self, alias: &str) -> Option<Entity> {
        self.matching.remove(alias)
    }

    /// All matching rows keyed by alias.
    pub fn matching_data(&self) -> &BTreeMap<String, Entity> {
        &self.matching
    }

    // ==================== Export ====================

    /// Render the entity graph as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = Map::new();
        for (k, prop) in &self.fields {
            map.insert(k.clone(), property_to_json(prop));
        }
        if !self.matching.is_empty() {
            let mut matching = Map::new();
            for (alias, e) in &self.matching {
                matching.insert(alias.clone(), e.to_json());
            }
            map.insert(MATCHING_DATA.to_string(), serde_json::Value::Object(matching));
        }
        serde_json::Value::Object(map)
    }
}

fn property_to_json(prop: &Property) -> serde_json::Value {
    match prop {
        Property::Value(v) => v.to_json(),
        Property::One(e) => e.to_json(),
        Property::Many(list) => serde_json::Value::Array(list.iter().map(Entity::to_json).collect()),
    }
}
