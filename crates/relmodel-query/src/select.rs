//! Dialect-aware SELECT builder.
//!
//! [`SelectQuery`] is a plain data structure: every clause is a public field
//! so the ORM layer can inspect and rewrite a query (replace its field list,
//! drop its ordering, append joins) before it is rendered.

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::expr::{Dialect, Expr};
use crate::join::Join;
use relmodel_core::Value;

/// One entry of the SELECT list, rendered as `expr AS "alias"`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectField {
    /// Output column name
    pub alias: String,
    /// Selected expression
    pub expr: Expr,
}

/// Non-generic SELECT representation.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Table name for the FROM clause
    pub table: String,
    /// Alias of the FROM table
    pub alias: String,
    /// Selected fields in output order (empty = `*`)
    pub fields: Vec<SelectField>,
    /// DISTINCT flag
    pub distinct: bool,
    /// JOIN clauses in render order
    pub joins: Vec<Join>,
    /// WHERE clause conditions
    pub where_clause: Option<Where>,
    /// GROUP BY expressions
    pub group_by: Vec<Expr>,
    /// HAVING clause
    pub having: Option<Where>,
    /// ORDER BY terms
    pub order_by: Vec<OrderBy>,
    /// LIMIT clause
    pub limit: Option<Limit>,
    /// OFFSET clause
    pub offset: Option<Offset>,
}

impl SelectQuery {
    /// Create a query reading from `table AS alias`.
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            fields: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add a selected field.
    #[must_use]
    pub fn field(mut self, alias: impl Into<String>, expr: Expr) -> Self {
        self.set_field(alias, expr);
        self
    }

    /// Add or replace a selected field by output name.
    pub fn set_field(&mut self, alias: impl Into<String>, expr: Expr) {
        let alias = alias.into();
        if let Some(existing) = self.fields.iter_mut().find(|f| f.alias == alias) {
            existing.expr = expr;
        } else {
            self.fields.push(SelectField { alias, expr });
        }
    }

    /// Add a selected field unless one with the same output name exists.
    pub fn add_field_if_absent(&mut self, alias: impl Into<String>, expr: Expr) {
        let alias = alias.into();
        if !self.has_field(&alias) {
            self.fields.push(SelectField { alias, expr });
        }
    }

    /// Whether a field with this output name is selected.
    pub fn has_field(&self, alias: &str) -> bool {
        self.fields.iter().any(|f| f.alias == alias)
    }

    /// Output names of the selected fields.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.alias.as_str()).collect()
    }

    /// Add a WHERE condition (AND).
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.and_where(expr);
        self
    }

    /// Add a WHERE condition (AND) in place.
    pub fn and_where(&mut self, expr: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
    }

    /// Append a JOIN.
    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Find a join by alias.
    pub fn find_join(&self, alias: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Add an ORDER BY term.
    #[must_use]
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Add a GROUP BY expression.
    #[must_use]
    pub fn group(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Set LIMIT.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    /// Set OFFSET.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Build the SQL query and parameters with a specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_into(dialect, &mut params);
        (sql, params)
    }

    /// Build a `SELECT COUNT(*)` over this query's result set.
    pub fn build_count_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut inner = self.clone();
        inner.order_by.clear();
        let inner_sql = inner.build_into(dialect, &mut params);
        (
            format!("SELECT COUNT(*) AS \"count\" FROM ({inner_sql}) AS \"count_source\""),
            params,
        )
    }

    /// Build the query as a fragment, appending bound values to a shared
    /// parameter list. Used for nested queries.
    pub fn build_into(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.fields.is_empty() {
            sql.push('*');
        } else {
            let field_sqls: Vec<_> = self
                .fields
                .iter()
                .map(|f| {
                    format!(
                        "{} AS {}",
                        f.expr.build_with_dialect(dialect, params),
                        dialect.quote_identifier(&f.alias)
                    )
                })
                .collect();
            sql.push_str(&field_sqls.join(", "));
        }

        // FROM
        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote_identifier(&self.table));
        sql.push_str(" AS ");
        sql.push_str(&dialect.quote_identifier(&self.alias));

        // JOINs
        for join in &self.joins {
            sql.push_str(&join.build_with_dialect(dialect, params));
        }

        // WHERE
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build_with_dialect(dialect, params));
        }

        // GROUP BY
        if !self.group_by.is_empty() {
            let group_sqls: Vec<_> = self
                .group_by
                .iter()
                .map(|e| e.build_with_dialect(dialect, params))
                .collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_sqls.join(", "));
        }

        // HAVING
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.build_with_dialect(dialect, params));
        }

        // ORDER BY
        if !self.order_by.is_empty() {
            let order_strs: Vec<_> = self
                .order_by
                .iter()
                .map(|o| o.build_with_dialect(dialect, params))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_strs.join(", "));
        }

        // LIMIT / OFFSET
        match (self.limit, self.offset) {
            (Some(Limit(n)), Some(Offset(m))) => sql.push_str(&format!(" LIMIT {n} OFFSET {m}")),
            (Some(Limit(n)), None) => sql.push_str(&format!(" LIMIT {n}")),
            // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
            (None, Some(Offset(m))) => sql.push_str(&format!(" LIMIT -1 OFFSET {m}")),
            (None, None) => {}
        }

        sql
    }
}
