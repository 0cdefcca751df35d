//! Query builders for INSERT, UPDATE, DELETE operations.
//!
//! The builders work on plain `(column, value)` lists so the ORM can write
//! any table described by a schema. WHERE conditions use unqualified columns.

use crate::clause::Where;
use crate::expr::{Dialect, Expr};
use relmodel_core::{Connection, Result, Value};

/// INSERT query builder.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    /// Create a new INSERT builder for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Set a column value.
    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Set several column values.
    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.values.extend(values);
        self
    }

    /// Build the INSERT SQL and parameters with specific dialect.
    ///
    /// With no values this renders `DEFAULT VALUES`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote_identifier(&self.table);
        if self.values.is_empty() {
            return (format!("INSERT INTO {table} DEFAULT VALUES"), Vec::new());
        }

        let columns: Vec<_> = self
            .values
            .iter()
            .map(|(name, _)| dialect.quote_identifier(name))
            .collect();
        let placeholders: Vec<_> = (1..=self.values.len())
            .map(|i| dialect.placeholder(i))
            .collect();
        let params = self.values.iter().map(|(_, v)| v.clone()).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, params)
    }

    /// Execute the INSERT and return the inserted row id.
    pub fn execute(self, conn: &dyn Connection, dialect: Dialect) -> Result<i64> {
        let (sql, params) = self.build_with_dialect(dialect);
        conn.insert(&sql, &params)
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set: Vec<(String, Value)>,
    where_clause: Option<Where>,
}

impl UpdateBuilder {
    /// Create a new UPDATE builder for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            where_clause: None,
        }
    }

    /// Set a column value.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    /// Set several column values.
    #[must_use]
    pub fn set_all(mut self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.set.extend(values);
        self
    }

    /// Add a WHERE condition.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Whether there is anything to update.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Build the UPDATE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut set_clauses = Vec::new();

        for (name, value) in &self.set {
            params.push(value.clone());
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_identifier(name),
                dialect.placeholder(params.len())
            ));
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            set_clauses.join(", ")
        );

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build_with_dialect(dialect, &mut params));
        }

        (sql, params)
    }

    /// Execute the UPDATE and return rows affected.
    pub fn execute(self, conn: &dyn Connection, dialect: Dialect) -> Result<u64> {
        if self.is_empty() {
            return Ok(0);
        }
        let (sql, params) = self.build_with_dialect(dialect);
        conn.execute(&sql, &params)
    }
}

/// DELETE query builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    where_clause: Option<Where>,
}

impl DeleteBuilder {
    /// Create a new DELETE builder for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    /// Add a WHERE condition.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Build the DELETE SQL and parameters with specific dialect.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));
        let mut params = Vec::new();

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build_with_dialect(dialect, &mut params));
        }

        (sql, params)
    }

    /// Execute the DELETE and return rows affected.
    pub fn execute(self, conn: &dyn Connection, dialect: Dialect) -> Result<u64> {
        let (sql, params) = self.build_with_dialect(dialect);
        conn.execute(&sql, &params)
    }
}
