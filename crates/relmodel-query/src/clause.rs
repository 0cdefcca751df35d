//! SQL clause types (WHERE, ORDER BY, LIMIT, etc.)

use crate::expr::{Dialect, Expr};
use relmodel_core::Value;

/// WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    expr: Expr,
}

impl Where {
    /// Create a new WHERE clause with the given expression.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// Add an AND condition.
    pub fn and(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.and(expr),
        }
    }

    /// Add an OR condition.
    pub fn or(self, expr: Expr) -> Self {
        Self {
            expr: self.expr.or(expr),
        }
    }

    /// The underlying expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Build the clause body, appending bound values to `params`.
    pub fn build_with_dialect(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        self.expr.build_with_dialect(dialect, params)
    }
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Sort expression
    pub expr: Expr,
    /// Sort direction
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Ascending order on a column of the given alias.
    pub fn asc(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::qualified(alias, column).asc()
    }

    /// Descending order on a column of the given alias.
    pub fn desc(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::qualified(alias, column).desc()
    }

    /// Generate SQL for this ORDER BY term.
    pub fn build_with_dialect(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let mut sql = self.expr.build_with_dialect(dialect, params);
        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });
        sql
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(pub u64);
