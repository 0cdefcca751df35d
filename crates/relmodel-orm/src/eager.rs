//! Query compilation and eager loading.
//!
//! [`compile`] turns a [`Query`] into one [`SelectQuery`], a [`Hydrator`]
//! for its rows and a plan of follow-up loads:
//!
//! 1. Root columns, following the auto-fields rule.
//! 2. Hand-written joins. Their aliases are reserved.
//! 3. Association filters (`matching`, `not_matching`, `*_join_with`).
//! 4. The contain tree. `join` nodes become LEFT/INNER joins in the same
//!    statement; `select` and `subquery` nodes become [`LoadNode`]s that
//!    [`load_contain`] runs once the root rows are hydrated.
//!
//! Join aliases are unique per statement. Registering an alias twice for
//! the same table and parent keeps the first join; anything else fails with
//! a `JoinAliasNotUnique` error. A contain node whose alias is already
//! taken is loaded with a separate query instead.

use crate::association::{AssociationKind, LoadOptions};
use crate::contain::{ContainNode, ContainTree};
use crate::query::{JoinMode, JoinWith, Query};
use crate::result::{HydrationNode, Hydrator};
use crate::strategy::Strategy;
use crate::table::Table;
use relmodel_core::{Entity, Error, OrmErrorKind, Result, TypeMap};
use relmodel_query::{
    Expr, Join, JoinType, Limit, Offset, SelectField, SelectQuery, Where,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A compiled query.
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub select: SelectQuery,
    pub hydrator: Hydrator,
    pub plan: Vec<LoadNode>,
}

impl Compiled {
    /// Whether hydrated rows still need association loads.
    pub fn has_pending_loads(&self) -> bool {
        self.plan.iter().any(LoadNode::is_pending)
    }
}

/// One contained association in the load plan.
#[derive(Debug, Clone)]
pub(crate) struct LoadNode {
    /// Table declaring the association
    pub source: Arc<Table>,
    pub association: String,
    /// Alias of the source rows in the compiled statement
    pub parent_alias: String,
    pub property: String,
    pub strategy: Strategy,
    /// Loaded by a join of the compiled statement
    pub joined: bool,
    pub node: ContainNode,
    /// Nested loads of a joined node
    pub children: Vec<LoadNode>,
}

impl LoadNode {
    fn is_pending(&self) -> bool {
        !self.joined || self.children.iter().any(LoadNode::is_pending)
    }
}

/// The joins of one statement, unique by alias.
struct JoinSet {
    root: String,
    joins: Vec<Join>,
    /// alias -> (source alias, table)
    owners: HashMap<String, (String, String)>,
    reserved: HashSet<String>,
}

impl JoinSet {
    fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            joins: Vec::new(),
            owners: HashMap::new(),
            reserved: HashSet::new(),
        }
    }

    fn reserve(&mut self, join: Join) {
        self.reserved.insert(join.alias.clone());
        self.joins.push(join);
    }

    fn is_taken(&self, alias: &str) -> bool {
        alias == self.root || self.owners.contains_key(alias) || self.reserved.contains(alias)
    }

    /// Add an association join. Returns `false` when an equivalent join is
    /// already present.
    fn register(&mut self, source: &str, join: Join) -> Result<bool> {
        if self.reserved.contains(&join.alias) {
            tracing::trace!(alias = %join.alias, "Alias joined by hand, skipping association join");
            return Ok(false);
        }
        let table = join.table().unwrap_or_default().to_string();
        if join.alias != self.root {
            match self.owners.get(&join.alias) {
                None => {
                    self.owners
                        .insert(join.alias.clone(), (source.to_string(), table));
                    self.joins.push(join);
                    return Ok(true);
                }
                Some((owner, owned)) if owner == source && *owned == table => {
                    return Ok(false);
                }
                Some(_) => {}
            }
        }
        Err(Error::orm(
            OrmErrorKind::JoinAliasNotUnique,
            format!(
                "the alias `{}` is used by more than one join; alias the association differently",
                join.alias
            ),
        ))
    }
}

struct Compiler<'q> {
    query: &'q Query,
    select: SelectQuery,
    joins: JoinSet,
    /// Table behind every alias with selected columns
    tables: HashMap<String, Arc<Table>>,
    filters: Vec<Expr>,
    matching: Vec<(String, String)>,
}

/// Compile `query` into a statement, a hydrator and a load plan.
#[tracing::instrument(level = "debug", skip(query), fields(table = %query.table.alias(), alias = %query.alias))]
pub(crate) fn compile(query: &Query) -> Result<Compiled> {
    let mut compiler = Compiler::new(query);
    compiler.root_fields();
    for join in &query.joins {
        compiler.joins.reserve(join.clone());
    }
    for join_with in &query.join_with {
        compiler.join_with(join_with)?;
    }
    for (alias, table) in &query.matching_tables {
        compiler.add_matching(alias, table, true);
    }

    let (nodes, plan) = if query.subquery {
        (Vec::new(), Vec::new())
    } else {
        let root = Arc::clone(&query.table);
        compiler.contain_all(&query.contain, &root, &query.alias)?
    };
    let compiled = compiler.finish(nodes, plan);
    tracing::trace!(
        joins = compiled.select.joins.len(),
        fields = compiled.select.fields.len(),
        loads = compiled.plan.len(),
        "Query compiled"
    );
    Ok(compiled)
}

impl<'q> Compiler<'q> {
    fn new(query: &'q Query) -> Self {
        let mut tables = HashMap::new();
        tables.insert(query.alias.clone(), Arc::clone(&query.table));
        Self {
            query,
            select: SelectQuery::new(query.table.table(), &query.alias),
            joins: JoinSet::new(&query.alias),
            tables,
            filters: Vec::new(),
            matching: Vec::new(),
        }
    }

    fn root_fields(&mut self) {
        let query = self.query;
        if query.subquery {
            if query.fields.is_empty() {
                for col in query.table.primary_key() {
                    self.select
                        .add_field_if_absent(col.clone(), Expr::qualified(&query.alias, col));
                }
            } else {
                for field in &query.fields {
                    let name = field
                        .alias
                        .split_once("__")
                        .map_or(field.alias.as_str(), |(_, col)| col);
                    self.select.set_field(name, field.expr.clone());
                }
            }
            return;
        }

        if self.uses_auto_fields() {
            self.all_columns(&query.alias, &query.table);
        }
        for field in &query.fields {
            self.select.set_field(field.alias.clone(), field.expr.clone());
        }
    }

    fn all_columns(&mut self, alias: &str, table: &Table) {
        for col in table.schema().columns() {
            self.select.add_field_if_absent(
                format!("{alias}__{}", col.name),
                Expr::qualified(alias, &col.name),
            );
        }
    }

    fn key_fields(&mut self, alias: &str, columns: &[String]) {
        if self.query.subquery {
            return;
        }
        for col in columns {
            self.select
                .add_field_if_absent(format!("{alias}__{col}"), Expr::qualified(alias, col));
        }
    }

    fn uses_auto_fields(&self) -> bool {
        self.query
            .auto_fields
            .unwrap_or(self.query.fields.is_empty())
    }

    /// Expose `table`, joined as `alias`, as matching data.
    ///
    /// `all_columns` forces every column. Otherwise explicit `alias.column`
    /// fields are kept as selected, auto-fields add every column, and a
    /// query with neither gets only the primary key.
    fn add_matching(&mut self, alias: &str, table: &Arc<Table>, all_columns: bool) {
        self.tables.insert(alias.to_string(), Arc::clone(table));
        if self.query.subquery {
            return;
        }
        let prefix = format!("{alias}__");
        let explicit = self
            .query
            .fields
            .iter()
            .any(|field| field.alias.starts_with(&prefix));
        if all_columns || self.uses_auto_fields() {
            self.all_columns(alias, table);
        } else if !explicit {
            self.key_fields(alias, table.primary_key());
        }
        if !self.matching.iter().any(|(a, _)| a == alias) {
            self.matching
                .push((alias.to_string(), table.alias().to_string()));
        }
    }

    // ==================== Association filters ====================

    fn join_with(&mut self, join_with: &JoinWith) -> Result<()> {
        if join_with.path.is_empty() {
            return Ok(());
        }
        if join_with.mode == JoinMode::NotMatching {
            return self.not_matching(join_with);
        }
        let join_type = match join_with.mode {
            JoinMode::Filter(join_type) => join_type,
            _ => JoinType::Inner,
        };

        let mut table = Arc::clone(&self.query.table);
        let mut alias = self.query.alias.clone();
        for (i, name) in join_with.path.iter().enumerate() {
            let last = i + 1 == join_with.path.len();
            let assoc = table.association(name)?;
            let conditions = if last { join_with.conditions.clone() } else { None };
            for join in assoc.build_joins(&alias, conditions, Some(join_type))? {
                self.joins.register(&alias, join)?;
            }
            let target = assoc.target()?;
            if last && join_with.mode == JoinMode::Matching {
                if assoc.kind() == AssociationKind::BelongsToMany {
                    let junction = assoc.junction()?;
                    self.add_matching(junction.alias(), &junction, false);
                }
                self.add_matching(name, &target, false);
            }
            table = target;
            alias.clone_from(name);
        }
        Ok(())
    }

    /// Rows without a related row along the path.
    ///
    /// A single hop that is not belongsToMany is a LEFT JOIN filtered on a
    /// NULL target key. Longer paths (and belongsToMany) join a derived table
    /// holding, for each source key, the smallest matching terminal key,
    /// and keep the rows where it is NULL. Root rows are never multiplied.
    fn not_matching(&mut self, join_with: &JoinWith) -> Result<()> {
        let query = self.query;
        let root_alias = query.alias.clone();
        let first = query.table.association(&join_with.path[0])?;
        let single = join_with.path.len() == 1;

        if single && first.kind() != AssociationKind::BelongsToMany {
            let target = first.target()?;
            for join in first.build_joins(&root_alias, join_with.conditions.clone(), Some(JoinType::Left))? {
                self.joins.register(&root_alias, join)?;
            }
            if let Some(filter) = Expr::all(
                target
                    .primary_key()
                    .iter()
                    .map(|col| Expr::qualified(first.name(), col).is_null()),
            ) {
                self.filters.push(filter);
            }
            return Ok(());
        }

        let source_key = first.source_key()?.to_vec();
        let target_key = first.target_key()?.to_vec();
        let (mut inner, key_alias) = if first.kind() == AssociationKind::BelongsToMany {
            let junction = first.junction()?;
            let conditions = if single { join_with.conditions.clone() } else { None };
            let mut inner = SelectQuery::new(junction.table(), junction.alias());
            inner.joins.extend(
                first
                    .build_joins(&root_alias, conditions, Some(JoinType::Inner))?
                    .into_iter()
                    .skip(1),
            );
            (inner, junction.alias().to_string())
        } else {
            let target = first.target()?;
            let mut inner = SelectQuery::new(target.table(), first.name());
            if let Some(conditions) = first.scoped_conditions() {
                inner.and_where(conditions);
            }
            (inner, first.name().to_string())
        };

        let mut table = first.target()?;
        let mut alias = first.name().to_string();
        for (i, name) in join_with.path.iter().enumerate().skip(1) {
            let assoc = table.association(name)?;
            let conditions = if i + 1 == join_with.path.len() {
                join_with.conditions.clone()
            } else {
                None
            };
            inner
                .joins
                .extend(assoc.build_joins(&alias, conditions, Some(JoinType::Inner))?);
            table = assoc.target()?;
            alias.clone_from(name);
        }

        let Some(terminal_key) = table.primary_key().first() else {
            return Err(Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!("`{}` has no primary key to anti-join on", table.alias()),
            ));
        };
        for (i, col) in target_key.iter().enumerate() {
            inner.fields.push(SelectField {
                alias: format!("__key_{i}"),
                expr: Expr::qualified(&key_alias, col),
            });
            inner.group_by.push(Expr::qualified(&key_alias, col));
        }
        inner.fields.push(SelectField {
            alias: "__pk".to_string(),
            expr: Expr::qualified(&alias, terminal_key).min(),
        });

        let on = Expr::all(source_key.iter().enumerate().map(|(i, col)| {
            Expr::qualified(&root_alias, col).eq(Expr::qualified(&alias, format!("__key_{i}")))
        }))
        .ok_or_else(|| {
            Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!("association `{}` has no key columns", first.name()),
            )
        })?;
        tracing::debug!(path = %join_with.path.join("."), "Anti-join through derived table");
        self.joins
            .register(&root_alias, Join::subquery(JoinType::Left, inner, alias.clone(), on))?;
        self.filters.push(Expr::qualified(&alias, "__pk").is_null());
        Ok(())
    }

    // ==================== Contain ====================

    fn contain_all(
        &mut self,
        tree: &ContainTree,
        parent: &Arc<Table>,
        parent_alias: &str,
    ) -> Result<(Vec<HydrationNode>, Vec<LoadNode>)> {
        let mut nodes = Vec::new();
        let mut plan = Vec::new();
        for (name, node) in tree.iter() {
            let assoc = parent.association(name)?;
            let mut strategy = node.strategy.unwrap_or_else(|| assoc.strategy());
            assoc.check_strategy(strategy)?;
            if strategy == Strategy::Join && self.joins.is_taken(name) {
                tracing::warn!(
                    association = name,
                    "Join alias already in use, loading with a separate query"
                );
                strategy = Strategy::Select;
            }
            let property = assoc.property_name().to_string();

            if strategy != Strategy::Join {
                self.key_fields(parent_alias, assoc.source_key()?);
                plan.push(LoadNode {
                    source: Arc::clone(parent),
                    association: name.to_string(),
                    parent_alias: parent_alias.to_string(),
                    property,
                    strategy,
                    joined: false,
                    node: node.clone(),
                    children: Vec::new(),
                });
                continue;
            }

            let target = assoc.target()?;
            for join in assoc.build_joins(parent_alias, node.conditions.clone(), node.join_type)? {
                self.joins.register(parent_alias, join)?;
            }
            self.tables.insert(name.to_string(), Arc::clone(&target));
            if node.auto_fields.unwrap_or(node.fields.is_empty()) {
                self.all_columns(name, &target);
            } else {
                let mut columns = node.fields.clone();
                columns.extend(target.primary_key().iter().cloned());
                self.key_fields(name, &columns);
            }
            if node.callback.is_some() {
                tracing::trace!(association = name, "Callbacks do not apply to joined associations");
            }

            let (children, nested) = self.contain_all(&node.contain, &target, name)?;
            nodes.push(HydrationNode {
                alias: name.to_string(),
                source: target.alias().to_string(),
                property: property.clone(),
                children,
            });
            plan.push(LoadNode {
                source: Arc::clone(parent),
                association: name.to_string(),
                parent_alias: parent_alias.to_string(),
                property,
                strategy,
                joined: true,
                node: node.clone(),
                children: nested,
            });
        }
        Ok((nodes, plan))
    }

    fn finish(mut self, nodes: Vec<HydrationNode>, plan: Vec<LoadNode>) -> Compiled {
        let query = self.query;
        self.select.joins = self.joins.joins;
        self.select.distinct = query.distinct;
        if let Some(conditions) = &query.conditions {
            self.select.and_where(conditions.clone());
        }
        for filter in self.filters {
            self.select.and_where(filter);
        }
        self.select.group_by.clone_from(&query.group_by);
        self.select.having = query.having.clone().map(Where::new);
        self.select.order_by.clone_from(&query.order);
        self.select.limit = query.limit.map(Limit);
        self.select.offset = query.offset.map(Offset);

        let mut types = TypeMap::new();
        for field in &self.select.fields {
            let Some((alias, col)) = field.alias.split_once("__") else {
                continue;
            };
            let column = self
                .tables
                .get(alias)
                .and_then(|table| table.schema().get(col));
            if let Some(column) = column {
                types.insert(field.alias.clone(), column.sql_type);
            }
        }

        let hydrator = Hydrator::new(
            &query.alias,
            query.table.alias(),
            nodes,
            self.matching,
            types,
        );
        Compiled {
            select: self.select,
            hydrator,
            plan,
        }
    }
}

/// Run the pending loads of `plan` for `entities`.
///
/// `origin` is the statement that produced the entities; subquery loads
/// filter on it.
pub(crate) fn load_contain(
    entities: &mut [&mut Entity],
    plan: &[LoadNode],
    origin: &SelectQuery,
) -> Result<()> {
    for load in plan {
        if !load.is_pending() {
            continue;
        }
        if load.joined {
            let mut nested: Vec<&mut Entity> = entities
                .iter_mut()
                .filter_map(|entity| entity.one_mut(&load.property))
                .collect();
            if !nested.is_empty() {
                load_contain(&mut nested, &load.children, origin)?;
            }
            continue;
        }
        let assoc = load.source.association(&load.association)?;
        assoc.load_related(
            entities,
            &LoadOptions {
                node: &load.node,
                strategy: load.strategy,
                origin: Some((origin, load.parent_alias.as_str())),
            },
        )?;
    }
    Ok(())
}
