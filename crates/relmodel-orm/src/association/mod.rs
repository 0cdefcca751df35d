//! Associations between tables.
//!
//! An [`Association`] describes how rows of a source table relate to rows of
//! a target table. The four variants share one struct: the kind decides the
//! direction of the key, the allowed loading strategies and how related rows
//! are saved. Variant-specific saving lives in the submodules.
//!
//! Keys are resolved lazily and memoized: the default foreign key of
//! `Users hasMany Posts` is `user_id`, the default binding key of a
//! `belongsTo` is the target's primary key, and the target table itself is
//! looked up in the registry on first use.

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_one;

use crate::contain::ContainNode;
use crate::persist::{DeleteOptions, SaveOptions};
use crate::query::Query;
use crate::registry::TableRegistry;
use crate::strategy::Strategy;
use crate::table::{Table, TableConfig};
use relmodel_core::{
    ColumnSchema, Entity, Error, JOIN_DATA, Key, OrmErrorKind, Property, Result, SqlType,
    TableSchema, Value, inflect, key_of,
};
use relmodel_query::{Expr, Join, JoinType, OrderBy, SelectField, SelectQuery};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

/// The four association variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// The source row holds the foreign key.
    BelongsTo,
    /// One target row holds the foreign key.
    HasOne,
    /// Many target rows hold the foreign key.
    HasMany,
    /// Source and target are linked through a junction table.
    BelongsToMany,
}

impl AssociationKind {
    /// Whether the key lives away from the source row.
    pub const fn is_owning_side(self) -> bool {
        !matches!(self, AssociationKind::BelongsTo)
    }

    /// Whether the property holds a list.
    pub const fn has_multiple(self) -> bool {
        matches!(
            self,
            AssociationKind::HasMany | AssociationKind::BelongsToMany
        )
    }

    /// Loading strategies this kind supports.
    pub const fn valid_strategies(self) -> &'static [Strategy] {
        match self {
            AssociationKind::BelongsTo | AssociationKind::HasOne => {
                &[Strategy::Join, Strategy::Select]
            }
            AssociationKind::HasMany | AssociationKind::BelongsToMany => {
                &[Strategy::Select, Strategy::Subquery]
            }
        }
    }

    pub const fn default_strategy(self) -> Strategy {
        match self {
            AssociationKind::BelongsTo | AssociationKind::HasOne => Strategy::Join,
            AssociationKind::HasMany | AssociationKind::BelongsToMany => Strategy::Select,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AssociationKind::BelongsTo => "belongsTo",
            AssociationKind::HasOne => "hasOne",
            AssociationKind::HasMany => "hasMany",
            AssociationKind::BelongsToMany => "belongsToMany",
        }
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a saved list of related rows treats rows already linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStrategy {
    /// Keep existing links, add the new ones.
    Append,
    /// The saved list becomes the complete set of links.
    #[default]
    Replace,
}

/// A named relation from a source table to a target table.
#[derive(Debug, Clone)]
pub struct Association {
    name: String,
    kind: AssociationKind,
    source_alias: String,
    source_primary_key: Vec<String>,
    class_name: String,
    registry: Weak<TableRegistry>,
    target: OnceLock<Weak<Table>>,
    foreign_key: OnceLock<Vec<String>>,
    binding_key: OnceLock<Vec<String>>,
    property_name: OnceLock<String>,
    target_foreign_key: OnceLock<Vec<String>>,
    through: Option<String>,
    junction: OnceLock<Weak<Table>>,
    join_type: JoinType,
    strategy: Strategy,
    dependent: bool,
    cascade_callbacks: bool,
    conditions: Option<Expr>,
    sort: Vec<OrderBy>,
    finder: Option<String>,
    save_strategy: SaveStrategy,
}

impl Association {
    pub(crate) fn new(kind: AssociationKind, name: impl Into<String>, source: &Table) -> Self {
        Self::detached(
            kind,
            name.into(),
            source.alias().to_string(),
            source.primary_key().to_vec(),
            source.registry_weak(),
        )
    }

    fn detached(
        kind: AssociationKind,
        name: String,
        source_alias: String,
        source_primary_key: Vec<String>,
        registry: Weak<TableRegistry>,
    ) -> Self {
        Self {
            class_name: name.clone(),
            name,
            kind,
            source_alias,
            source_primary_key,
            registry,
            target: OnceLock::new(),
            foreign_key: OnceLock::new(),
            binding_key: OnceLock::new(),
            property_name: OnceLock::new(),
            target_foreign_key: OnceLock::new(),
            through: None,
            junction: OnceLock::new(),
            join_type: JoinType::Left,
            strategy: kind.default_strategy(),
            dependent: kind == AssociationKind::BelongsToMany,
            cascade_callbacks: false,
            conditions: None,
            sort: Vec::new(),
            finder: None,
            save_strategy: SaveStrategy::default(),
        }
    }

    // ==================== Configuration ====================

    /// Alias of the registered table this association points at. Defaults to
    /// the association name.
    pub fn set_class_name(&mut self, class_name: impl Into<String>) -> &mut Self {
        self.class_name = class_name.into();
        self.target = OnceLock::new();
        self
    }

    pub fn set_foreign_key<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key = OnceLock::from(columns.into_iter().map(Into::into).collect::<Vec<_>>());
        self
    }

    pub fn set_binding_key<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.binding_key = OnceLock::from(columns.into_iter().map(Into::into).collect::<Vec<_>>());
        self
    }

    /// Junction column pointing at the target (belongsToMany).
    pub fn set_target_foreign_key<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_foreign_key =
            OnceLock::from(columns.into_iter().map(Into::into).collect::<Vec<_>>());
        self
    }

    pub fn set_property_name(&mut self, property: impl Into<String>) -> &mut Self {
        self.property_name = OnceLock::from(property.into());
        self
    }

    /// Alias of the junction table (belongsToMany).
    pub fn set_through(&mut self, junction_alias: impl Into<String>) -> &mut Self {
        self.through = Some(junction_alias.into());
        self.junction = OnceLock::new();
        self
    }

    pub fn set_join_type(&mut self, join_type: JoinType) -> &mut Self {
        self.join_type = join_type;
        self
    }

    /// Set the default loading strategy.
    pub fn set_strategy(&mut self, strategy: Strategy) -> Result<&mut Self> {
        self.check_strategy(strategy)?;
        self.strategy = strategy;
        Ok(self)
    }

    /// Whether related rows are deleted along with the source row.
    pub fn set_dependent(&mut self, dependent: bool) -> &mut Self {
        self.dependent = dependent;
        self
    }

    /// Whether cascaded deletes run the target table's listeners.
    pub fn set_cascade_callbacks(&mut self, cascade: bool) -> &mut Self {
        self.cascade_callbacks = cascade;
        self
    }

    /// Static filter applied whenever target rows are read through this
    /// association. Unqualified columns refer to the target.
    pub fn set_conditions(&mut self, conditions: Expr) -> &mut Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn set_sort(&mut self, sort: Vec<OrderBy>) -> &mut Self {
        self.sort = sort;
        self
    }

    /// Named finder of the target table applied to association queries.
    pub fn set_finder(&mut self, finder: impl Into<String>) -> &mut Self {
        self.finder = Some(finder.into());
        self
    }

    pub fn set_save_strategy(&mut self, strategy: SaveStrategy) -> &mut Self {
        self.save_strategy = strategy;
        self
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn source_alias(&self) -> &str {
        &self.source_alias
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_owning_side(&self) -> bool {
        self.kind.is_owning_side()
    }

    pub fn has_multiple(&self) -> bool {
        self.kind.has_multiple()
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn dependent(&self) -> bool {
        self.dependent
    }

    pub fn cascade_callbacks(&self) -> bool {
        self.cascade_callbacks
    }

    pub fn conditions(&self) -> Option<&Expr> {
        self.conditions.as_ref()
    }

    pub fn sort(&self) -> &[OrderBy] {
        &self.sort
    }

    pub fn finder(&self) -> Option<&str> {
        self.finder.as_deref()
    }

    pub fn save_strategy(&self) -> SaveStrategy {
        self.save_strategy
    }

    /// Foreign key columns. On the source row for `belongsTo`, on the
    /// target (or junction) rows otherwise.
    pub fn foreign_key(&self) -> &[String] {
        self.foreign_key.get_or_init(|| {
            let alias = match self.kind {
                AssociationKind::BelongsTo => &self.name,
                _ => &self.source_alias,
            };
            vec![inflect::foreign_key(alias)]
        })
    }

    /// Columns the foreign key points at: the target's primary key for
    /// `belongsTo`, the source's primary key otherwise.
    pub fn binding_key(&self) -> Result<&[String]> {
        if let Some(key) = self.binding_key.get() {
            return Ok(key);
        }
        let key = match self.kind {
            AssociationKind::BelongsTo => self.target()?.primary_key().to_vec(),
            _ => self.source_primary_key.clone(),
        };
        if key.is_empty() {
            return Err(Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!("association `{}` has no binding key", self.name),
            ));
        }
        Ok(self.binding_key.get_or_init(|| key))
    }

    /// Junction columns pointing at the target (belongsToMany).
    pub fn target_foreign_key(&self) -> &[String] {
        self.target_foreign_key
            .get_or_init(|| vec![inflect::foreign_key(&self.name)])
    }

    /// Entity property the related rows are stored under.
    pub fn property_name(&self) -> &str {
        self.property_name.get_or_init(|| {
            let base = inflect::underscore(&self.name);
            if self.has_multiple() {
                base
            } else {
                inflect::singularize(&base)
            }
        })
    }

    /// Columns of the source row that identify the related rows.
    pub fn source_key(&self) -> Result<&[String]> {
        match self.kind {
            AssociationKind::BelongsTo => Ok(self.foreign_key()),
            _ => self.binding_key(),
        }
    }

    /// Columns of the related rows (junction rows for belongsToMany) that
    /// match [`Association::source_key`].
    pub fn target_key(&self) -> Result<&[String]> {
        match self.kind {
            AssociationKind::BelongsTo => self.binding_key(),
            _ => Ok(self.foreign_key()),
        }
    }

    fn registry(&self) -> Result<Arc<TableRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| Error::Custom("table registry was dropped".to_string()))
    }

    /// The target table, resolved through the registry on first access.
    pub fn target(&self) -> Result<Arc<Table>> {
        if let Some(table) = self.target.get().and_then(Weak::upgrade) {
            return Ok(table);
        }
        let table = self.registry()?.get(&self.class_name)?;
        let _ = self.target.set(Arc::downgrade(&table));
        Ok(table)
    }

    /// An association declared on the target table, e.g. `Tags` on the
    /// target of `Posts`.
    pub fn target_association(&self, name: &str) -> Result<Association> {
        let target = self.target()?;
        target.association(name).cloned()
    }

    /// Alias of the junction table: the `through` alias, or both aliases
    /// sorted and concatenated (`Posts` + `Tags` → `PostsTags`).
    pub fn junction_alias(&self) -> String {
        if let Some(through) = &self.through {
            return through.clone();
        }
        let mut aliases = [self.source_alias.as_str(), self.name.as_str()];
        aliases.sort_unstable();
        aliases.concat()
    }

    /// The junction table, registered with a generated two-column schema
    /// when no table exists under the junction alias.
    pub fn junction(&self) -> Result<Arc<Table>> {
        if let Some(table) = self.junction.get().and_then(Weak::upgrade) {
            return Ok(table);
        }
        let registry = self.registry()?;
        let alias = self.junction_alias();
        let table = if registry.has(&alias) {
            registry.get(&alias)?
        } else {
            let mut schema = TableSchema::new();
            for col in self.foreign_key().iter().chain(self.target_foreign_key()) {
                schema = schema.column(ColumnSchema::new(col.clone(), SqlType::Integer).primary_key());
            }
            registry.get_or_add(TableConfig::new(alias).schema(schema))?
        };
        let _ = self.junction.set(Arc::downgrade(&table));
        Ok(table)
    }

    /// The source → junction half of a belongsToMany, as a dependent
    /// hasMany on the junction table.
    pub fn junction_association(&self) -> Result<Association> {
        let junction = self.junction()?;
        let mut link = Association::detached(
            AssociationKind::HasMany,
            junction.alias().to_string(),
            self.source_alias.clone(),
            self.source_primary_key.clone(),
            self.registry.clone(),
        );
        link.foreign_key = OnceLock::from(self.foreign_key().to_vec());
        link.binding_key = OnceLock::from(self.binding_key()?.to_vec());
        link.dependent = true;
        link.cascade_callbacks = self.cascade_callbacks;
        link.target = OnceLock::from(Arc::downgrade(&junction));
        Ok(link)
    }

    /// The junction → target half of a belongsToMany, as a belongsTo.
    pub fn junction_target_association(&self) -> Result<Association> {
        let junction = self.junction()?;
        let target = self.target()?;
        let mut link = Association::detached(
            AssociationKind::BelongsTo,
            self.name.clone(),
            junction.alias().to_string(),
            junction.primary_key().to_vec(),
            self.registry.clone(),
        );
        link.class_name = self.class_name.clone();
        link.foreign_key = OnceLock::from(self.target_foreign_key().to_vec());
        link.binding_key = OnceLock::from(target.primary_key().to_vec());
        link.target = OnceLock::from(Arc::downgrade(&target));
        Ok(link)
    }

    pub(crate) fn check_strategy(&self, strategy: Strategy) -> Result<()> {
        if self.kind.valid_strategies().contains(&strategy) {
            return Ok(());
        }
        let valid: Vec<&str> = self
            .kind
            .valid_strategies()
            .iter()
            .map(|s| s.as_str())
            .collect();
        Err(Error::orm(
            OrmErrorKind::InvalidStrategy,
            format!(
                "invalid strategy `{}` for {} association `{}`; use one of: {}",
                strategy,
                self.kind,
                self.name,
                valid.join(", ")
            ),
        ))
    }

    /// Association conditions qualified to the target alias.
    pub(crate) fn scoped_conditions(&self) -> Option<Expr> {
        self.conditions.clone().map(|c| c.qualify(&self.name))
    }

    // ==================== Joins ====================

    /// Joins that bring the target rows into a query where the source is
    /// aliased `source_alias`.
    ///
    /// The ON clause is the key equality, then the association conditions,
    /// then `conditions`. belongsToMany yields two joins with the same join
    /// type: source to junction, then junction to target.
    pub fn build_joins(
        &self,
        source_alias: &str,
        conditions: Option<Expr>,
        join_type: Option<JoinType>,
    ) -> Result<Vec<Join>> {
        let join_type = join_type.unwrap_or(self.join_type);
        let target = self.target()?;
        let extra = conditions.map(|c| c.qualify(&self.name));

        if self.kind == AssociationKind::BelongsToMany {
            let junction = self.junction()?;
            let junction_alias = junction.alias();
            let to_junction = key_equality(
                source_alias,
                self.binding_key()?,
                junction_alias,
                self.foreign_key(),
                &self.name,
            )?;
            let to_target = key_equality(
                junction_alias,
                self.target_foreign_key(),
                &self.name,
                target.primary_key(),
                &self.name,
            )?;
            let on = [Some(to_target), self.scoped_conditions(), extra]
                .into_iter()
                .flatten()
                .reduce(Expr::and)
                .unwrap_or_else(|| Expr::raw("1 = 1"));
            return Ok(vec![
                Join::new(join_type, junction.table(), junction_alias, to_junction),
                Join::new(join_type, target.table(), &self.name, on),
            ]);
        }

        let keys = key_equality(
            source_alias,
            self.source_key()?,
            &self.name,
            self.target_key()?,
            &self.name,
        )?;
        let on = [Some(keys), self.scoped_conditions(), extra]
            .into_iter()
            .flatten()
            .reduce(Expr::and)
            .unwrap_or_else(|| Expr::raw("1 = 1"));
        Ok(vec![Join::new(join_type, target.table(), &self.name, on)])
    }

    // ==================== Reading ====================

    /// A query over the target rows reachable through this association,
    /// with its conditions, sort and finder applied. The target is aliased
    /// with the association name.
    pub fn find(&self) -> Result<Query> {
        let target = self.target()?;
        let mut query = target.query_as(&self.name);

        if self.kind == AssociationKind::BelongsToMany {
            let junction = self.junction()?;
            let on = key_equality(
                junction.alias(),
                self.target_foreign_key(),
                &self.name,
                target.primary_key(),
                &self.name,
            )?;
            query = query
                .join(Join::inner(junction.table(), junction.alias(), on))
                .with_matching_table(junction.alias().to_string(), Arc::clone(&junction));
        }
        if let Some(conditions) = self.scoped_conditions() {
            query = query.where_(conditions);
        }
        for order in &self.sort {
            query = query.order_by(order.clone());
        }
        if let Some(finder) = &self.finder {
            query = target.apply_finder(finder, query)?;
        }
        Ok(query)
    }

    /// Related rows of `entities`: an association query filtered by the
    /// distinct source keys. Entities without a key are skipped; with no keys
    /// at all the query is empty and never touches the database.
    pub fn find_related(&self, entities: &[Entity]) -> Result<Query> {
        let keys = collect_keys(entities.iter(), self.source_key()?);
        self.related_query(&keys)
    }

    fn related_query(&self, keys: &[Vec<Value>]) -> Result<Query> {
        let query = self.find()?;
        if keys.is_empty() {
            return Ok(query.into_empty());
        }
        let filter = key_filter(&self.filter_alias()?, self.target_key()?, keys);
        Ok(query.where_(filter))
    }

    /// Alias carrying the target key columns in association queries.
    fn filter_alias(&self) -> Result<String> {
        match self.kind {
            AssociationKind::BelongsToMany => Ok(self.junction()?.alias().to_string()),
            _ => Ok(self.name.clone()),
        }
    }

    /// Fetch the related rows of `entities` and store them under the
    /// association property.
    ///
    /// The property is marked clean afterwards. Entities with no related
    /// rows receive NULL (single) or an empty list (multiple).
    #[tracing::instrument(level = "debug", skip(self, entities, options), fields(association = %self.name, count = entities.len()))]
    pub(crate) fn load_related(
        &self,
        entities: &mut [&mut Entity],
        options: &LoadOptions<'_>,
    ) -> Result<()> {
        let property = self.property_name().to_string();
        let source_key = self.source_key()?.to_vec();
        let keys = collect_keys(entities.iter().map(|e| &**e), &source_key);

        if keys.is_empty() {
            tracing::trace!("No keys to load, skipping query");
            for entity in entities.iter_mut() {
                entity.set_property(property.clone(), self.empty_property());
                entity.set_dirty(&property, false);
            }
            return Ok(());
        }

        let mut query = match (options.strategy, options.origin) {
            (Strategy::Subquery, Some((origin, origin_alias))) => {
                let filter = self.subquery_filter(origin, origin_alias)?;
                self.find()?.where_(filter)
            }
            _ => self.related_query(&keys)?,
        };
        query = self.apply_node(query, options.node)?;
        let rows = query.all()?;
        tracing::debug!(rows = rows.len(), strategy = %options.strategy, "Association rows loaded");

        let target_key = self.target_key()?.to_vec();
        let junction_alias = match self.kind {
            AssociationKind::BelongsToMany => Some(self.junction()?.alias().to_string()),
            _ => None,
        };
        let mut buckets: HashMap<Key, Vec<Entity>> = HashMap::new();
        for mut row in rows {
            let key = match &junction_alias {
                Some(alias) => {
                    let Some(link) = row.take_matching(alias) else {
                        continue;
                    };
                    let key = link.extract_key(&target_key);
                    row.set_one(JOIN_DATA, link);
                    row.set_dirty(JOIN_DATA, false);
                    key
                }
                None => row.extract_key(&target_key),
            };
            if let Some(key) = key {
                buckets.entry(key).or_default().push(row);
            }
        }

        for entity in entities.iter_mut() {
            let related = entity
                .extract_key(&source_key)
                .and_then(|key| buckets.get(&key));
            let value = match related {
                Some(rows) if self.has_multiple() => Property::Many(rows.clone()),
                Some(rows) => rows
                    .first()
                    .map_or(Property::Value(Value::Null), |row| {
                        Property::One(Box::new(row.clone()))
                    }),
                None => self.empty_property(),
            };
            entity.set_property(property.clone(), value);
            entity.set_dirty(&property, false);
        }
        Ok(())
    }

    fn empty_property(&self) -> Property {
        if self.has_multiple() {
            Property::Many(Vec::new())
        } else {
            Property::Value(Value::Null)
        }
    }

    /// `target_key IN (origin query selecting the source key)`.
    ///
    /// The origin keeps its joins and filters; its ordering is dropped
    /// unless a LIMIT makes it significant.
    fn subquery_filter(&self, origin: &SelectQuery, origin_alias: &str) -> Result<Expr> {
        let source_key = self.source_key()?;
        let target_key = self.target_key()?;
        let filter_alias = self.filter_alias()?;

        let mut inner = origin.clone();
        inner.fields = source_key
            .iter()
            .map(|col| SelectField {
                alias: col.clone(),
                expr: Expr::qualified(origin_alias, col),
            })
            .collect();
        if inner.limit.is_none() {
            inner.order_by.clear();
        }

        let column = if target_key.len() == 1 {
            Expr::qualified(&filter_alias, &target_key[0])
        } else {
            Expr::Tuple(
                target_key
                    .iter()
                    .map(|col| Expr::qualified(&filter_alias, col))
                    .collect(),
            )
        };
        Ok(column.in_query(inner))
    }

    /// Apply the per-query options of a contain node.
    fn apply_node(&self, mut query: Query, node: &ContainNode) -> Result<Query> {
        if let Some(conditions) = &node.conditions {
            query = query.where_(conditions.clone());
        }
        if !node.fields.is_empty() {
            let mut fields = node.fields.clone();
            if self.kind != AssociationKind::BelongsToMany {
                for col in self.target_key()? {
                    if !fields.contains(col) {
                        fields.push(col.clone());
                    }
                }
            }
            query = query.select(fields);
        }
        if let Some(auto_fields) = node.auto_fields {
            query = query.enable_auto_fields(auto_fields);
        }
        if !node.contain.is_empty() {
            query = query.contain(node.contain.clone());
        }
        if let Some(callback) = &node.callback {
            query = callback(query);
        }
        Ok(query)
    }

    // ==================== Writing ====================

    /// Save the related rows stored under the association property of each
    /// entity whose property is dirty.
    pub(crate) fn save_related(&self, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
        match self.kind {
            AssociationKind::BelongsTo => belongs_to::save(self, entities, options),
            AssociationKind::HasOne => has_one::save(self, entities, options),
            AssociationKind::HasMany => has_many::save(self, entities, options),
            AssociationKind::BelongsToMany => {
                let replace = self.save_strategy == SaveStrategy::Replace;
                belongs_to_many::save_links(self, entities, options, replace)
            }
        }
    }

    /// Detach every row related to `entities`, except rows matching
    /// `exclude`.
    ///
    /// Dependent associations, and associations whose foreign key cannot be
    /// NULL, delete the rows through the target table, so the rows' own
    /// associations cascade too. Otherwise the foreign key is set to NULL.
    #[tracing::instrument(level = "debug", skip(self, entities, exclude), fields(association = %self.name))]
    pub fn unlink_all(&self, entities: &[Entity], exclude: Option<Expr>) -> Result<bool> {
        let keys = collect_keys(entities.iter(), self.binding_key()?);
        if keys.is_empty() {
            return Ok(true);
        }
        let target = self.target()?;
        let foreign_key = self.foreign_key().to_vec();

        let mut query = target
            .query_as(&self.name)
            .where_(key_filter(&self.name, &foreign_key, &keys));
        if let Some(conditions) = self.scoped_conditions() {
            query = query.where_(conditions);
        }
        if let Some(exclude) = exclude {
            query = query.where_(exclude.qualify(&self.name).not());
        }
        let mut related = query.all()?;
        if related.is_empty() {
            return Ok(true);
        }

        let nullable = foreign_key
            .iter()
            .all(|col| target.schema().is_nullable(col));
        if self.dependent || !nullable {
            tracing::debug!(rows = related.len(), "Deleting unlinked rows");
            let options = DeleteOptions {
                atomic: false,
                check_rules: false,
                callbacks: self.cascade_callbacks,
            };
            for entity in &mut related {
                if !target.delete(entity, &options)? {
                    return Ok(false);
                }
            }
        } else {
            tracing::debug!(rows = related.len(), "Clearing foreign key of unlinked rows");
            let options = SaveOptions {
                atomic: false,
                associated: crate::persist::Associated::None,
                ..SaveOptions::default()
            };
            for entity in &mut related {
                for col in &foreign_key {
                    entity.set(col.clone(), Value::Null);
                }
                if !target.save(entity, &options)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Delete-time cascade for one source entity.
    ///
    /// belongsTo never cascades. belongsToMany removes the junction rows.
    /// hasOne/hasMany unlink every related row: deleted when dependent or
    /// when the foreign key is NOT NULL, otherwise detached.
    pub(crate) fn cascade_delete(&self, entity: &Entity, _options: &DeleteOptions) -> Result<bool> {
        let entities = std::slice::from_ref(entity);
        match self.kind {
            AssociationKind::BelongsTo => Ok(true),
            AssociationKind::BelongsToMany => self.junction_association()?.unlink_all(entities, None),
            AssociationKind::HasOne | AssociationKind::HasMany => self.unlink_all(entities, None),
        }
    }

    // ==================== Junction links ====================

    /// Link `targets` to a persisted `source` without touching existing
    /// links. Targets are saved first.
    pub fn link(&self, source: &mut Entity, targets: Vec<Entity>) -> Result<bool> {
        belongs_to_many::link(self, source, targets)
    }

    /// Remove the junction rows between `source` and `targets`.
    pub fn unlink(&self, source: &mut Entity, targets: &[Entity]) -> Result<bool> {
        belongs_to_many::unlink(self, source, targets)
    }

    /// Make `targets` the complete set of rows linked to `source`.
    pub fn replace_links(&self, source: &mut Entity, targets: Vec<Entity>) -> Result<bool> {
        belongs_to_many::replace_links(self, source, targets)
    }
}

/// Per-load options passed down by the eager loader.
pub(crate) struct LoadOptions<'a> {
    pub node: &'a ContainNode,
    pub strategy: Strategy,
    /// The query that produced the source rows and the source alias in it
    pub origin: Option<(&'a SelectQuery, &'a str)>,
}

/// `left.l1 = right.r1 AND left.l2 = right.r2 ...`
fn key_equality(
    left_alias: &str,
    left: &[String],
    right_alias: &str,
    right: &[String],
    association: &str,
) -> Result<Expr> {
    if left.len() != right.len() {
        return Err(Error::orm(
            OrmErrorKind::MissingPrimaryKey,
            format!(
                "association `{association}` joins {} column(s) to {} column(s)",
                left.len(),
                right.len()
            ),
        ));
    }
    Expr::all(
        left.iter()
            .zip(right)
            .map(|(l, r)| Expr::qualified(left_alias, l).eq(Expr::qualified(right_alias, r))),
    )
    .ok_or_else(|| {
        Error::orm(
            OrmErrorKind::MissingPrimaryKey,
            format!("association `{association}` has no key columns"),
        )
    })
}

/// Distinct non-NULL key values of `columns`, in first-seen order.
pub(crate) fn collect_keys<'a>(
    entities: impl Iterator<Item = &'a Entity>,
    columns: &[String],
) -> Vec<Vec<Value>> {
    let mut seen: BTreeSet<Key> = BTreeSet::new();
    let mut out = Vec::new();
    for entity in entities {
        let values = entity.extract(columns);
        if let Some(key) = key_of(&values) {
            if seen.insert(key) {
                out.push(values);
            }
        }
    }
    out
}

/// Filter matching any of `keys` on `alias.columns`.
pub(crate) fn key_filter(alias: &str, columns: &[String], keys: &[Vec<Value>]) -> Expr {
    if let [column] = columns {
        let column = Expr::qualified(alias, column);
        return match keys {
            [key] => column.eq(key[0].clone()),
            _ => column.in_list(keys.iter().map(|k| k[0].clone()).collect::<Vec<Value>>()),
        };
    }
    Expr::any(keys.iter().filter_map(|key| {
        Expr::all(
            columns
                .iter()
                .zip(key)
                .map(|(col, value)| Expr::qualified(alias, col).eq(value.clone())),
        )
    }))
    .unwrap_or_else(|| Expr::raw("1 = 0"))
}

/// Related rows taken out of their parents for a bulk save, with the index
/// of the parent each one came from.
pub(crate) struct Detached {
    slots: Vec<Slot>,
    pub owners: Vec<usize>,
    pub children: Vec<Entity>,
}

enum Slot {
    Skip,
    One,
    Many(usize),
}

impl Detached {
    /// Take the dirty `property` out of every entity.
    pub fn take(entities: &mut [Entity], property: &str) -> Self {
        let mut detached = Detached {
            slots: Vec::with_capacity(entities.len()),
            owners: Vec::new(),
            children: Vec::new(),
        };
        for (index, entity) in entities.iter_mut().enumerate() {
            if !entity.is_dirty(property) {
                detached.slots.push(Slot::Skip);
                continue;
            }
            match entity.take(property) {
                Some(Property::One(child)) => {
                    detached.slots.push(Slot::One);
                    detached.owners.push(index);
                    detached.children.push(*child);
                }
                Some(Property::Many(list)) => {
                    detached.slots.push(Slot::Many(list.len()));
                    detached.owners.extend(std::iter::repeat_n(index, list.len()));
                    detached.children.extend(list);
                }
                Some(other) => {
                    entity.set_property(property, other);
                    detached.slots.push(Slot::Skip);
                }
                None => detached.slots.push(Slot::Skip),
            }
        }
        detached
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Skip))
    }

    /// Put the children back. Saved properties are marked clean.
    pub fn restore(self, entities: &mut [Entity], property: &str, saved: bool) {
        let mut children = self.children.into_iter();
        for (entity, slot) in entities.iter_mut().zip(self.slots) {
            match slot {
                Slot::Skip => continue,
                Slot::One => {
                    if let Some(child) = children.next() {
                        entity.set_one(property, child);
                    }
                }
                Slot::Many(n) => {
                    entity.set_many(property, children.by_ref().take(n).collect());
                }
            }
            entity.set_dirty(property, !saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_kind_strategies() {
        assert_eq!(AssociationKind::BelongsTo.default_strategy(), Strategy::Join);
        assert_eq!(AssociationKind::HasMany.default_strategy(), Strategy::Select);
        assert!(!AssociationKind::BelongsToMany
            .valid_strategies()
            .contains(&Strategy::Join));
        assert!(AssociationKind::HasOne.is_owning_side());
        assert!(!AssociationKind::BelongsTo.is_owning_side());
    }

    #[test]
    fn test_default_keys_and_properties() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let posts = registry.get("Posts").unwrap();

        let user_posts = users.association("Posts").unwrap();
        assert_eq!(user_posts.foreign_key(), ["user_id".to_string()]);
        assert_eq!(user_posts.binding_key().unwrap(), ["id".to_string()]);
        assert_eq!(user_posts.property_name(), "posts");

        let post_user = posts.association("Users").unwrap();
        assert_eq!(post_user.foreign_key(), ["user_id".to_string()]);
        assert_eq!(post_user.binding_key().unwrap(), ["id".to_string()]);
        assert_eq!(post_user.property_name(), "user");

        let post_tags = posts.association("Tags").unwrap();
        assert_eq!(post_tags.foreign_key(), ["post_id".to_string()]);
        assert_eq!(post_tags.target_foreign_key(), ["tag_id".to_string()]);
        assert_eq!(post_tags.junction_alias(), "PostsTags");
        assert!(post_tags.dependent());
    }

    #[test]
    fn test_keys_are_memoized() {
        let (registry, _) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let assoc = posts.association("Users").unwrap();
        let first = assoc.binding_key().unwrap().as_ptr();
        let second = assoc.binding_key().unwrap().as_ptr();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&assoc.target().unwrap(), &assoc.target().unwrap()));
    }

    #[test]
    fn test_target_association_delegates_to_target() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let posts = users.association("Posts").unwrap();
        let tags = posts.target_association("Tags").unwrap();
        assert_eq!(tags.kind(), AssociationKind::BelongsToMany);
        assert_eq!(tags.source_alias(), "Posts");
        assert!(posts.target_association("Nope").unwrap_err().is_unknown_association());
    }

    #[test]
    fn test_explicit_keys_override_defaults() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut assoc = Association::new(AssociationKind::HasMany, "Articles", &users);
        assoc
            .set_class_name("Posts")
            .set_foreign_key(["author_id"])
            .set_property_name("articles_written");
        assert_eq!(assoc.foreign_key(), ["author_id".to_string()]);
        assert_eq!(assoc.property_name(), "articles_written");
        assert_eq!(assoc.target().unwrap().alias(), "Posts");
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut assoc = Association::new(AssociationKind::HasMany, "Posts", &users);
        let err = assoc.set_strategy(Strategy::Join).unwrap_err();
        assert!(err.is_invalid_strategy());
        assert_eq!(assoc.strategy(), Strategy::Select);
        assert!(assoc.set_strategy(Strategy::Subquery).is_ok());
    }

    #[test]
    fn test_build_joins_orders_conditions() {
        let (registry, _) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let assoc = posts.association("Users").unwrap();
        let joins = assoc
            .build_joins("Posts", Some(Expr::col("active").eq(true)), Some(JoinType::Inner))
            .unwrap();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].join_type, JoinType::Inner);
        assert_eq!(
            joins[0].on,
            Expr::qualified("Posts", "user_id")
                .eq(Expr::qualified("Users", "id"))
                .and(Expr::qualified("Users", "active").eq(true))
        );
    }

    #[test]
    fn test_belongs_to_many_builds_two_joins() {
        let (registry, _) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let assoc = posts.association("Tags").unwrap();
        let joins = assoc.build_joins("Posts", None, None).unwrap();
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].alias, "PostsTags");
        assert_eq!(joins[0].table(), Some("posts_tags"));
        assert_eq!(joins[1].alias, "Tags");
        assert_eq!(joins[0].join_type, joins[1].join_type);
        assert_eq!(
            joins[1].on,
            Expr::qualified("PostsTags", "tag_id").eq(Expr::qualified("Tags", "id"))
        );
    }

    #[test]
    fn test_generated_junction_table() {
        let (registry, _) = testing::empty_registry();
        registry
            .add_with(TableConfig::new("Articles").schema(TableSchema::new().id()), |t| {
                t.belongs_to_many("Labels");
                Ok(())
            })
            .unwrap();
        registry
            .add(TableConfig::new("Labels").schema(TableSchema::new().id()))
            .unwrap();
        let articles = registry.get("Articles").unwrap();
        let junction = articles.association("Labels").unwrap().junction().unwrap();
        assert_eq!(junction.alias(), "ArticlesLabels");
        assert_eq!(junction.table(), "articles_labels");
        assert_eq!(
            junction.primary_key(),
            ["article_id".to_string(), "label_id".to_string()]
        );
        assert!(registry.has("ArticlesLabels"));
    }

    #[test]
    fn test_key_filter_shapes() {
        let single = key_filter("Posts", &["user_id".to_string()], &[vec![Value::BigInt(1)]]);
        assert_eq!(single, Expr::qualified("Posts", "user_id").eq(Value::BigInt(1)));

        let list = key_filter(
            "Posts",
            &["user_id".to_string()],
            &[vec![Value::BigInt(1)], vec![Value::BigInt(2)]],
        );
        assert!(matches!(list, Expr::In { negated: false, .. }));

        let composite = key_filter(
            "J",
            &["a".to_string(), "b".to_string()],
            &[vec![Value::BigInt(1), Value::BigInt(2)]],
        );
        let mut params = Vec::new();
        assert_eq!(
            composite.build_with_dialect(relmodel_query::Dialect::Sqlite, &mut params),
            "(\"J\".\"a\" = ?1 AND \"J\".\"b\" = ?2)"
        );
    }

    #[test]
    fn test_collect_keys_skips_nulls_and_duplicates() {
        let a = Entity::from_values([("user_id", Value::BigInt(1))]);
        let b = Entity::from_values([("user_id", Value::Int(1))]);
        let c = Entity::from_values([("user_id", Value::Null)]);
        let d = Entity::from_values([("user_id", Value::BigInt(2))]);
        let keys = collect_keys([a, b, c, d].iter(), &["user_id".to_string()]);
        assert_eq!(keys, vec![vec![Value::BigInt(1)], vec![Value::BigInt(2)]]);
    }

    #[test]
    fn test_find_related_without_keys_is_empty() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let assoc = users.association("Posts").unwrap();
        let mut query = assoc.find_related(&[Entity::new()]).unwrap();
        assert!(query.all().unwrap().is_empty());
        assert!(state.lock().unwrap().queries.is_empty());
    }

    #[test]
    fn test_detach_and_restore() {
        let mut parents = vec![Entity::new(), Entity::new(), Entity::new()];
        parents[0].set_many("posts", vec![Entity::new(), Entity::new()]);
        parents[2].set_many("posts", vec![Entity::new()]);
        let detached = Detached::take(&mut parents, "posts");
        assert_eq!(detached.owners, vec![0, 0, 2]);
        assert!(!parents[0].has("posts"));
        detached.restore(&mut parents, "posts", true);
        assert_eq!(parents[0].many("posts").unwrap().len(), 2);
        assert_eq!(parents[2].many("posts").unwrap().len(), 1);
        assert!(!parents[0].is_dirty("posts"));
        assert!(!parents[1].has("posts"));
    }
}
