//! ORM queries.
//!
//! A [`Query`] is a lazily compiled SELECT over one table plus everything
//! the ORM layers on top: a contain tree, association filters
//! (`matching`, `not_matching`, `inner_join_with`, `left_join_with`) and the
//! hydration of rows into entities.
//!
//! Compilation happens on first execution and is cached until the query is
//! mutated again. Every column is selected as `Alias__column`, which is how
//! the hydrator knows which entity a value belongs to.

use crate::contain::ContainTree;
use crate::datasource::ConnectionRole;
use crate::eager::{self, Compiled};
use crate::result::ResultIter;
use crate::table::Table;
use relmodel_core::{Entity, Error, Result, Value};
use relmodel_query::{Expr, Join, JoinType, OrderBy, SelectField, SelectQuery};
use std::fmt;
use std::sync::Arc;

/// How an association path filters the root rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinMode {
    /// Plain join (`inner_join_with` / `left_join_with`)
    Filter(JoinType),
    /// Inner join whose terminal rows land in `_matchingData`
    Matching,
    /// Keep only rows with no related row
    NotMatching,
}

/// One association path joined for filtering.
#[derive(Debug, Clone)]
pub(crate) struct JoinWith {
    pub path: Vec<String>,
    pub conditions: Option<Expr>,
    pub mode: JoinMode,
}

/// A query over one table.
#[derive(Clone)]
pub struct Query {
    pub(crate) table: Arc<Table>,
    pub(crate) alias: String,
    pub(crate) fields: Vec<SelectField>,
    pub(crate) auto_fields: Option<bool>,
    pub(crate) conditions: Option<Expr>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) group_by: Vec<Expr>,
    pub(crate) having: Option<Expr>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) joins: Vec<Join>,
    pub(crate) contain: ContainTree,
    pub(crate) join_with: Vec<JoinWith>,
    pub(crate) matching_tables: Vec<(String, Arc<Table>)>,
    pub(crate) subquery: bool,
    buffered: bool,
    empty: bool,
    compiled: Option<Compiled>,
    before_find_fired: bool,
}

impl Query {
    pub(crate) fn new(table: Arc<Table>, alias: String) -> Self {
        Self {
            table,
            alias,
            fields: Vec::new(),
            auto_fields: None,
            conditions: None,
            order: Vec::new(),
            group_by: Vec::new(),
            having: None,
            limit: None,
            offset: None,
            distinct: false,
            joins: Vec::new(),
            contain: ContainTree::new(),
            join_with: Vec::new(),
            matching_tables: Vec::new(),
            subquery: false,
            buffered: true,
            empty: false,
            compiled: None,
            before_find_fired: false,
        }
    }

    /// The queried table.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Alias of the root table in the SQL.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn contain_tree(&self) -> &ContainTree {
        &self.contain
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    fn touch(&mut self) {
        self.compiled = None;
    }

    // ==================== Builders ====================

    /// Select columns. Bare names refer to the root table; `Alias.column`
    /// refers to a joined association. Selecting fields turns auto-fields
    /// off unless it was enabled explicitly.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            let (alias, column) = match field.split_once('.') {
                Some((alias, column)) => (alias.to_string(), column.to_string()),
                None => (self.alias.clone(), field),
            };
            self.push_field(SelectField {
                alias: format!("{alias}__{column}"),
                expr: Expr::qualified(alias, column),
            });
        }
        self.touch();
        self
    }

    /// Select an arbitrary expression under `name`. Names without `__` end
    /// up as plain properties of the root entity.
    #[must_use]
    pub fn select_expr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.push_field(SelectField {
            alias: name.into(),
            expr,
        });
        self.touch();
        self
    }

    fn push_field(&mut self, field: SelectField) {
        match self.fields.iter_mut().find(|f| f.alias == field.alias) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Select every column of the root table (and of joined associations
    /// without explicit fields) in addition to the selected fields.
    #[must_use]
    pub fn enable_auto_fields(mut self, enabled: bool) -> Self {
        self.auto_fields = Some(enabled);
        self.touch();
        self
    }

    /// Add a WHERE condition (AND). Unqualified columns refer to the root
    /// table.
    #[must_use]
    pub fn where_(mut self, condition: Expr) -> Self {
        let condition = condition.qualify(&self.alias);
        self.conditions = Some(match self.conditions.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self.touch();
        self
    }

    /// Alias of [`Query::where_`].
    #[must_use]
    pub fn and_where(self, condition: Expr) -> Self {
        self.where_(condition)
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(OrderBy {
            expr: order.expr.qualify(&self.alias),
            direction: order.direction,
        });
        self.touch();
        self
    }

    #[must_use]
    pub fn order_asc(self, column: impl Into<String>) -> Self {
        self.order_by(Expr::col(column).asc())
    }

    #[must_use]
    pub fn order_desc(self, column: impl Into<String>) -> Self {
        self.order_by(Expr::col(column).desc())
    }

    #[must_use]
    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr.qualify(&self.alias));
        self.touch();
        self
    }

    #[must_use]
    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self.touch();
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self.touch();
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.touch();
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self.touch();
        self
    }

    /// Add a hand-written join. Association joins with the same alias are
    /// dropped in its favor.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self.touch();
        self
    }

    /// Eager load associations. Repeated calls merge into one tree.
    #[must_use]
    pub fn contain(mut self, contain: impl Into<ContainTree>) -> Self {
        self.contain.merge(&contain.into());
        self.touch();
        self
    }

    /// Keep rows that have a related row along `path` matching
    /// `conditions`; the matched rows are exposed in `_matchingData`.
    #[must_use]
    pub fn matching(self, path: &str, conditions: impl Into<Option<Expr>>) -> Self {
        self.add_join_with(path, conditions.into(), JoinMode::Matching)
    }

    /// Keep rows that have no related row along `path` matching
    /// `conditions`.
    #[must_use]
    pub fn not_matching(self, path: &str, conditions: impl Into<Option<Expr>>) -> Self {
        self.add_join_with(path, conditions.into(), JoinMode::NotMatching)
    }

    /// INNER JOIN the association path without selecting its columns.
    #[must_use]
    pub fn inner_join_with(self, path: &str, conditions: impl Into<Option<Expr>>) -> Self {
        self.add_join_with(path, conditions.into(), JoinMode::Filter(JoinType::Inner))
    }

    /// LEFT JOIN the association path without selecting its columns.
    #[must_use]
    pub fn left_join_with(self, path: &str, conditions: impl Into<Option<Expr>>) -> Self {
        self.add_join_with(path, conditions.into(), JoinMode::Filter(JoinType::Left))
    }

    fn add_join_with(mut self, path: &str, conditions: Option<Expr>, mode: JoinMode) -> Self {
        let path: Vec<String> = path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.join_with.push(JoinWith {
            path,
            conditions,
            mode,
        });
        self.touch();
        self
    }

    /// Apply a named finder of the root table.
    pub fn apply_finder(self, finder: &str) -> Result<Self> {
        let table = Arc::clone(&self.table);
        table.apply_finder(finder, self)
    }

    /// Hydrate lazily while iterating instead of building every entity up
    /// front. Ignored when eager loads are pending.
    #[must_use]
    pub fn disable_buffered_results(mut self) -> Self {
        self.buffered = false;
        self
    }

    /// Select only the keys needed when this query is used as a filter.
    #[must_use]
    pub fn as_subquery(mut self) -> Self {
        self.subquery = true;
        self.touch();
        self
    }

    /// Expose every column of `table`, joined as `alias`, in the matching
    /// data of each result.
    pub(crate) fn with_matching_table(mut self, alias: String, table: Arc<Table>) -> Self {
        self.matching_tables.push((alias, table));
        self.touch();
        self
    }

    /// A query that returns nothing without running.
    pub(crate) fn into_empty(mut self) -> Self {
        self.empty = true;
        self
    }

    /// Drop the compiled state; the next execution compiles again.
    pub fn reset(&mut self) {
        self.touch();
    }

    // ==================== Compilation ====================

    fn compiled(&mut self) -> Result<&Compiled> {
        if self.compiled.is_none() {
            if !self.before_find_fired {
                self.before_find_fired = true;
                let table = Arc::clone(&self.table);
                for listener in table.listeners() {
                    listener.before_find(self);
                }
            }
            let compiled = eager::compile(self)?;
            self.compiled = Some(compiled);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| Error::Custom("query compilation produced no result".to_string()))
    }

    /// Compile the query and return the SELECT it runs.
    pub fn prepare(&mut self) -> Result<&SelectQuery> {
        Ok(&self.compiled()?.select)
    }

    /// Rendered SQL and bound parameters.
    pub fn sql(&mut self) -> Result<(String, Vec<Value>)> {
        let registry = self.table.registry()?;
        let dialect = registry.datasource().dialect();
        Ok(self.compiled()?.select.build_with_dialect(dialect))
    }

    /// Output names of the selected columns.
    pub fn selected_fields(&mut self) -> Result<Vec<String>> {
        Ok(self
            .compiled()?
            .select
            .field_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    // ==================== Execution ====================

    /// Run the query and return every hydrated entity, with contained
    /// associations loaded.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.table.alias(), alias = %self.alias))]
    pub fn all(&mut self) -> Result<Vec<Entity>> {
        if self.empty {
            tracing::trace!("Empty query, skipping execution");
            return Ok(Vec::new());
        }
        let registry = self.table.registry()?;
        let datasource = registry.datasource();
        let compiled = self.compiled()?;
        let (sql, params) = compiled.select.build_with_dialect(datasource.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing select");
        let rows = datasource
            .connection(ConnectionRole::Read)
            .query(&sql, &params)?;
        tracing::debug!(rows = rows.len(), "Select complete");

        let mut entities: Vec<Entity> = rows.iter().map(|row| compiled.hydrator.hydrate(row)).collect();
        if compiled.has_pending_loads() && !entities.is_empty() {
            let mut refs: Vec<&mut Entity> = entities.iter_mut().collect();
            eager::load_contain(&mut refs, &compiled.plan, &compiled.select)?;
        }
        Ok(entities)
    }

    /// Run the query with LIMIT 1.
    pub fn first(&mut self) -> Result<Option<Entity>> {
        let mut limited = self.clone().limit(1);
        Ok(limited.all()?.into_iter().next())
    }

    /// Count the rows the query would return.
    pub fn count(&mut self) -> Result<u64> {
        if self.empty {
            return Ok(0);
        }
        let registry = self.table.registry()?;
        let datasource = registry.datasource();
        let compiled = self.compiled()?;
        let (sql, params) = compiled.select.build_count_with_dialect(datasource.dialect());
        let row = datasource
            .connection(ConnectionRole::Read)
            .query_one(&sql, &params)?;
        Ok(row
            .and_then(|r| r.get(0).and_then(Value::as_i64))
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0))
    }

    /// Run the query and return an iterator over the results.
    ///
    /// Unbuffered queries hydrate each row on first access and cache it by
    /// index. When eager loads are pending the results are always buffered,
    /// since loading needs every parent up front.
    pub fn iter(&mut self) -> Result<ResultIter> {
        if self.empty {
            return Ok(ResultIter::buffered(Vec::new()));
        }
        let pending = self.compiled()?.has_pending_loads();
        if self.buffered || pending {
            if !self.buffered {
                tracing::warn!(alias = %self.alias, "Eager loads pending, buffering results");
            }
            return Ok(ResultIter::buffered(self.all()?));
        }
        let registry = self.table.registry()?;
        let datasource = registry.datasource();
        let compiled = self.compiled()?;
        let (sql, params) = compiled.select.build_with_dialect(datasource.dialect());
        let rows = datasource
            .connection(ConnectionRole::Read)
            .query(&sql, &params)?;
        Ok(ResultIter::lazy(rows, compiled.hydrator.clone()))
    }

    /// Run the query and return each row as nested JSON, without building
    /// entities or loading contained associations.
    pub fn all_parsed(&mut self) -> Result<Vec<serde_json::Value>> {
        if self.empty {
            return Ok(Vec::new());
        }
        let registry = self.table.registry()?;
        let datasource = registry.datasource();
        let compiled = self.compiled()?;
        let (sql, params) = compiled.select.build_with_dialect(datasource.dialect());
        let rows = datasource
            .connection(ConnectionRole::Read)
            .query(&sql, &params)?;
        Ok(rows
            .iter()
            .map(|row| compiled.hydrator.parse_row(row).to_json())
            .collect())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table.alias())
            .field("alias", &self.alias)
            .field("conditions", &self.conditions)
            .field("contain", &self.contain)
            .field("join_with", &self.join_with)
            .field("compiled", &self.compiled.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contain::ContainNode;
    use crate::listener::TableListener;
    use crate::registry::TableRegistry;
    use crate::strategy::Strategy;
    use crate::table::TableConfig;
    use crate::testing::{self, row};
    use relmodel_core::{ColumnSchema, OrmErrorKind, SqlType, TableSchema};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn users(registry: &Arc<TableRegistry>) -> Arc<Table> {
        registry.get("Users").unwrap()
    }

    #[test]
    fn test_auto_fields_select_every_column() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find();
        assert_eq!(
            q.selected_fields().unwrap(),
            vec!["Users__id", "Users__name", "Users__email"]
        );
    }

    #[test]
    fn test_explicit_fields_disable_auto_fields() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find().select(["name"]);
        assert_eq!(q.selected_fields().unwrap(), vec!["Users__name"]);

        let mut q = users(&registry)
            .find()
            .select(["name"])
            .enable_auto_fields(true);
        assert_eq!(q.selected_fields().unwrap().len(), 3);
    }

    #[test]
    fn test_where_qualifies_bare_columns() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find().where_(Expr::col("name").eq("ada"));
        let (sql, params) = q.sql().unwrap();
        assert!(sql.ends_with("FROM \"users\" AS \"Users\" WHERE \"Users\".\"name\" = ?1"));
        assert_eq!(params, vec![Value::Text("ada".into())]);
    }

    #[test]
    fn test_contain_belongs_to_joins() {
        let (registry, _) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let mut q = posts.find().contain("Users");
        let (sql, _) = q.sql().unwrap();
        assert!(sql.contains(
            "LEFT JOIN \"users\" AS \"Users\" ON \"Posts\".\"user_id\" = \"Users\".\"id\""
        ));
        assert!(sql.contains("\"Users\".\"name\" AS \"Users__name\""));
    }

    #[test]
    fn test_contain_has_many_adds_key_field_only() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find().select(["name"]).contain("Posts");
        let (sql, _) = q.sql().unwrap();
        assert!(!sql.contains("JOIN"));
        assert_eq!(q.selected_fields().unwrap(), vec!["Users__name", "Users__id"]);
    }

    #[test]
    fn test_contain_invalid_strategy() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry)
            .find()
            .contain(("Posts", ContainNode::new().strategy(Strategy::Join)));
        assert!(q.sql().unwrap_err().is_invalid_strategy());
    }

    #[test]
    fn test_contain_unknown_association() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find().contain("Nope");
        assert!(q.sql().unwrap_err().is_unknown_association());
    }

    #[test]
    fn test_matching_uses_inner_joins() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry)
            .find()
            .matching("Posts.Tags", Expr::col("tag").eq("rust"));
        let (sql, params) = q.sql().unwrap();
        assert!(sql.contains("INNER JOIN \"posts\" AS \"Posts\" ON \"Users\".\"id\" = \"Posts\".\"user_id\""));
        assert!(sql.contains("INNER JOIN \"posts_tags\" AS \"PostsTags\""));
        assert!(sql.contains("INNER JOIN \"tags\" AS \"Tags\""));
        assert!(sql.contains("\"Tags\".\"tag\" = ?1"));
        assert!(sql.contains("\"Tags\".\"tag\" AS \"Tags__tag\""));
        assert!(!sql.contains("AS \"Posts__title\""));
        assert_eq!(params, vec![Value::Text("rust".into())]);
    }

    #[test]
    fn test_matching_without_auto_fields_selects_target_key() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry)
            .find()
            .select(["name"])
            .matching("Posts.Tags", Expr::col("tag").eq("rust"));
        let fields = q.selected_fields().unwrap();
        assert!(fields.contains(&"Tags__id".to_string()));
        assert!(!fields.contains(&"Tags__tag".to_string()));

        let mut q = users(&registry)
            .find()
            .select(["name", "Tags.tag"])
            .matching("Posts.Tags", Expr::col("tag").eq("rust"));
        let fields = q.selected_fields().unwrap();
        assert!(fields.contains(&"Tags__tag".to_string()));
        assert!(!fields.contains(&"Tags__id".to_string()));
    }

    #[test]
    fn test_not_matching_single_hop() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry).find().not_matching("Posts", None);
        let (sql, _) = q.sql().unwrap();
        assert!(sql.contains("LEFT JOIN \"posts\" AS \"Posts\""));
        assert!(sql.ends_with("WHERE \"Posts\".\"id\" IS NULL"));
    }

    #[test]
    fn test_not_matching_multi_hop_uses_derived_table() {
        let (registry, _) = testing::blog_registry();
        let mut q = users(&registry)
            .find()
            .not_matching("Posts.Tags", Expr::col("tag").eq("rust"));
        let (sql, _) = q.sql().unwrap();
        assert!(sql.contains("LEFT JOIN (SELECT \"Posts\".\"user_id\" AS \"__key_0\", MIN(\"Tags\".\"id\") AS \"__pk\""));
        assert!(sql.contains("GROUP BY \"Posts\".\"user_id\") AS \"Tags\" ON \"Users\".\"id\" = \"Tags\".\"__key_0\""));
        assert!(sql.ends_with("WHERE \"Tags\".\"__pk\" IS NULL"));
    }

    #[test]
    fn test_contain_downgraded_when_alias_is_matched() {
        let (registry, _) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let mut q = posts
            .find()
            .matching("Users", Expr::col("name").eq("ada"))
            .contain("Users");
        let (sql, _) = q.sql().unwrap();
        assert_eq!(sql.matches("JOIN \"users\"").count(), 1);
        assert!(q.compiled().unwrap().has_pending_loads());
    }

    #[test]
    fn test_alias_not_unique() {
        let (registry, _) = testing::empty_registry();
        let schema = || {
            TableSchema::new()
                .id()
                .column(ColumnSchema::new("author_id", SqlType::Integer))
                .column(ColumnSchema::new("editor_id", SqlType::Integer))
        };
        registry
            .add(TableConfig::new("People").schema(TableSchema::new().id()))
            .unwrap();
        registry
            .add(TableConfig::new("Reviewers").schema(TableSchema::new().id()))
            .unwrap();
        let articles = registry
            .add_with(TableConfig::new("Articles").schema(schema()), |t| {
                t.belongs_to("Authors")
                    .set_class_name("People")
                    .set_foreign_key(["author_id"]);
                t.belongs_to("Editors")
                    .set_class_name("Reviewers")
                    .set_foreign_key(["editor_id"]);
                Ok(())
            })
            .unwrap();
        let mut q = articles
            .find()
            .inner_join_with("Authors", None)
            .join(Join::inner(
                "reviewers",
                "Authors",
                Expr::raw("1 = 1"),
            ));
        assert!(q.sql().is_ok());

        let mut q = articles
            .find()
            .inner_join_with("Authors", None)
            .left_join_with("Authors", None);
        assert!(q.sql().is_ok());

        let mut clash = articles
            .query_as("Authors")
            .inner_join_with("Authors", None);
        let err = clash.sql().unwrap_err();
        assert_eq!(err.orm_kind(), Some(OrmErrorKind::JoinAliasNotUnique));
    }

    #[test]
    fn test_compiled_state_is_cached_and_reset() {
        struct Counter(Arc<AtomicUsize>);
        impl TableListener for Counter {
            fn before_find(&self, _query: &mut Query) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Counter(Arc::clone(&calls));
        let (registry, _) = testing::empty_registry();
        let table = registry
            .add_with(TableConfig::new("Tags").schema(TableSchema::new().id()), |t| {
                t.add_listener(counter);
                Ok(())
            })
            .unwrap();
        let mut q = table.find();
        let first = q.sql().unwrap();
        assert_eq!(q.sql().unwrap(), first);
        q.reset();
        assert_eq!(q.sql().unwrap(), first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_query_never_runs() {
        let (registry, state) = testing::blog_registry();
        let mut q = users(&registry).find().into_empty();
        assert!(q.all().unwrap().is_empty());
        assert_eq!(q.count().unwrap(), 0);
        assert!(state.lock().unwrap().queries.is_empty());
    }

    #[test]
    fn test_count_wraps_query() {
        let (registry, state) = testing::blog_registry();
        state
            .lock()
            .unwrap()
            .responses
            .push_back(vec![row(&[("count", Value::Int(4))])]);
        assert_eq!(users(&registry).find().count().unwrap(), 4);
        assert!(state.lock().unwrap().queries[0]
            .0
            .starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT"));
    }

    #[test]
    fn test_unbuffered_iteration_hydrates_lazily() {
        let (registry, state) = testing::blog_registry();
        state.lock().unwrap().responses.push_back(vec![
            row(&[("Users__id", Value::Int(1)), ("Users__name", Value::Text("ada".into()))]),
            row(&[("Users__id", Value::Int(2)), ("Users__name", Value::Text("bob".into()))]),
        ]);
        let mut results = users(&registry)
            .find()
            .disable_buffered_results()
            .iter()
            .unwrap();
        assert_eq!(results.len(), 2);
        let second = results.get(1).unwrap().clone();
        assert_eq!(second.value("name"), Some(&Value::Text("bob".into())));
        let names: Vec<_> = results
            .map(|e| e.value("name").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(
            names,
            vec![Value::Text("ada".into()), Value::Text("bob".into())]
        );
    }

    #[test]
    fn test_all_parsed_nests_joined_rows() {
        let (registry, state) = testing::blog_registry();
        state.lock().unwrap().responses.push_back(vec![row(&[
            ("Posts__id", Value::Int(1)),
            ("Posts__title", Value::Text("hello".into())),
            ("Posts__user_id", Value::Int(1)),
            ("Users__id", Value::Int(1)),
            ("Users__name", Value::Text("ada".into())),
        ])]);
        let posts = registry.get("Posts").unwrap();
        let parsed = posts
            .find()
            .select(["id", "title", "user_id", "Users.id", "Users.name"])
            .contain(("Users", ContainNode::new().fields(["id", "name"])))
            .all_parsed()
            .unwrap();
        assert_eq!(parsed[0]["title"], "hello");
        assert_eq!(parsed[0]["user"]["name"], "ada");
    }
}
