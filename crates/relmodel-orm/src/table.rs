//! Tables: schema, associations, rules, listeners and finders of one alias.

use crate::association::{Association, AssociationKind};
use crate::listener::TableListener;
use crate::query::Query;
use crate::registry::TableRegistry;
use crate::rules::RulesChecker;
use relmodel_core::{Entity, Error, OrmErrorKind, Result, TableSchema, Value, inflect};
use relmodel_query::Expr;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A named query modifier registered on a table.
pub type Finder = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Everything needed to register a table.
#[derive(Debug, Clone, Default)]
pub struct TableConfig {
    /// Alias the table is registered and queried under
    pub alias: String,
    /// Database table name; `tableize(alias)` when `None`
    pub table: Option<String>,
    /// Primary key columns; taken from the schema when `None`
    pub primary_key: Option<Vec<String>>,
    /// Column list
    pub schema: TableSchema,
    /// Column used to label rows
    pub display_field: Option<String>,
}

impl TableConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: TableSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = Some(field.into());
        self
    }
}

/// A registered table.
///
/// Tables are configured while being registered (see
/// [`TableRegistry::add_with`]) and shared immutably afterwards.
pub struct Table {
    alias: String,
    table: String,
    primary_key: Vec<String>,
    schema: TableSchema,
    display_field: String,
    associations: Vec<Association>,
    rules: RulesChecker,
    listeners: Vec<Arc<dyn TableListener>>,
    finders: BTreeMap<String, Finder>,
    registry: Weak<TableRegistry>,
}

impl Table {
    pub(crate) fn new(config: TableConfig, registry: Weak<TableRegistry>) -> Self {
        let table = config
            .table
            .unwrap_or_else(|| inflect::tableize(&config.alias));
        let primary_key = config
            .primary_key
            .unwrap_or_else(|| config.schema.primary_key());
        let display_field = config.display_field.unwrap_or_else(|| {
            ["title", "name"]
                .into_iter()
                .find(|c| config.schema.has_column(c))
                .map(str::to_string)
                .or_else(|| primary_key.first().cloned())
                .unwrap_or_default()
        });
        Self {
            alias: config.alias,
            table,
            primary_key,
            schema: config.schema,
            display_field,
            associations: Vec::new(),
            rules: RulesChecker::new(),
            listeners: Vec::new(),
            finders: BTreeMap::new(),
            registry,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Database table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn display_field(&self) -> &str {
        &self.display_field
    }

    pub fn registry(&self) -> Result<Arc<TableRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| Error::Custom("table registry was dropped".to_string()))
    }

    pub(crate) fn registry_weak(&self) -> Weak<TableRegistry> {
        self.registry.clone()
    }

    // ==================== Associations ====================

    /// Declare a belongsTo association. `name` is the target alias unless
    /// a class name is set.
    pub fn belongs_to(&mut self, name: impl Into<String>) -> &mut Association {
        self.add_association(AssociationKind::BelongsTo, name.into())
    }

    pub fn has_one(&mut self, name: impl Into<String>) -> &mut Association {
        self.add_association(AssociationKind::HasOne, name.into())
    }

    pub fn has_many(&mut self, name: impl Into<String>) -> &mut Association {
        self.add_association(AssociationKind::HasMany, name.into())
    }

    pub fn belongs_to_many(&mut self, name: impl Into<String>) -> &mut Association {
        self.add_association(AssociationKind::BelongsToMany, name.into())
    }

    fn add_association(&mut self, kind: AssociationKind, name: String) -> &mut Association {
        let association = Association::new(kind, name, self);
        let index = match self
            .associations
            .iter()
            .position(|a| a.name() == association.name())
        {
            Some(index) => {
                self.associations[index] = association;
                index
            }
            None => {
                self.associations.push(association);
                self.associations.len() - 1
            }
        };
        &mut self.associations[index]
    }

    /// Associations in declaration order.
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.associations.iter().any(|a| a.name() == name)
    }

    pub fn association(&self, name: &str) -> Result<&Association> {
        self.associations
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| {
                Error::orm(
                    OrmErrorKind::UnknownAssociation,
                    format!("{} is not associated with {}", self.alias, name),
                )
            })
    }

    // ==================== Rules, listeners, finders ====================

    pub fn rules(&self) -> &RulesChecker {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RulesChecker {
        &mut self.rules
    }

    pub fn add_listener(&mut self, listener: impl TableListener + 'static) -> &mut Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn listeners(&self) -> &[Arc<dyn TableListener>] {
        &self.listeners
    }

    /// Register a named finder, usable through [`Table::find_by`] and as an
    /// association finder.
    pub fn add_finder<F>(&mut self, name: impl Into<String>, finder: F) -> &mut Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.finders.insert(name.into(), Arc::new(finder));
        self
    }

    /// Apply a named finder to `query`.
    pub fn apply_finder(&self, name: &str, query: Query) -> Result<Query> {
        let finder = self.finders.get(name).ok_or_else(|| {
            Error::Custom(format!("unknown finder `{}` on table {}", name, self.alias))
        })?;
        Ok(finder(query))
    }

    // ==================== Entities and queries ====================

    /// A new, empty entity of this table.
    pub fn new_entity(&self) -> Entity {
        let mut entity = Entity::new();
        entity.set_source(self.alias.clone());
        entity
    }

    /// A query over this table under its own alias.
    pub fn find(self: &Arc<Self>) -> Query {
        Query::new(Arc::clone(self), self.alias.clone())
    }

    /// A query over this table under another alias.
    pub fn query_as(self: &Arc<Self>, alias: impl Into<String>) -> Query {
        Query::new(Arc::clone(self), alias.into())
    }

    /// A query with a named finder applied.
    pub fn find_by(self: &Arc<Self>, finder: &str) -> Result<Query> {
        self.apply_finder(finder, self.find())
    }

    /// Fetch one row by primary key.
    pub fn get(self: &Arc<Self>, key: impl Into<Value>) -> Result<Option<Entity>> {
        self.get_by_key(&[key.into()])
    }

    /// Fetch one row by a (possibly composite) primary key.
    pub fn get_by_key(self: &Arc<Self>, key: &[Value]) -> Result<Option<Entity>> {
        if self.primary_key.is_empty() || self.primary_key.len() != key.len() {
            return Err(Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!(
                    "table {} has a {}-column primary key, got {} value(s)",
                    self.alias,
                    self.primary_key.len(),
                    key.len()
                ),
            ));
        }
        let condition = Expr::all(
            self.primary_key
                .iter()
                .zip(key)
                .map(|(col, value)| Expr::qualified(&self.alias, col).eq(value.clone())),
        );
        let mut query = self.find();
        if let Some(condition) = condition {
            query = query.where_(condition);
        }
        query.first()
    }

    /// Whether any row matches `conditions`.
    pub fn exists(self: &Arc<Self>, conditions: Expr) -> Result<bool> {
        let mut query = self.find().where_(conditions).limit(1);
        Ok(query.first()?.is_some())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("alias", &self.alias)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field(
                "associations",
                &self
                    .associations
                    .iter()
                    .map(|a| format!("{} {}", a.kind(), a.name()))
                    .collect::<Vec<_>>(),
            )
            .field("rules", &self.rules.len())
            .field("listeners", &self.listeners.len())
            .field("finders", &self.finders.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
