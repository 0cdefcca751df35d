//! JOIN clause types.

use crate::expr::{Dialect, Expr};
use crate::select::SelectQuery;
use relmodel_core::Value;

/// What a JOIN reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSource {
    /// A named table
    Table(String),
    /// A derived table built from a nested query
    Subquery(Box<SelectQuery>),
}

/// A JOIN clause. Every join carries an alias; the alias is how the rest of
/// the query refers to the joined rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table or derived table to join
    pub source: JoinSource,
    /// Alias of the joined rows
    pub alias: String,
    /// ON condition
    pub on: Expr,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl Join {
    /// Create a join against a named table.
    pub fn new(
        join_type: JoinType,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: Expr,
    ) -> Self {
        Self {
            join_type,
            source: JoinSource::Table(table.into()),
            alias: alias.into(),
            on,
        }
    }

    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, alias: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Inner, table, alias, on)
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, alias: impl Into<String>, on: Expr) -> Self {
        Self::new(JoinType::Left, table, alias, on)
    }

    /// Create a join against a derived table.
    pub fn subquery(
        join_type: JoinType,
        query: SelectQuery,
        alias: impl Into<String>,
        on: Expr,
    ) -> Self {
        Self {
            join_type,
            source: JoinSource::Subquery(Box::new(query)),
            alias: alias.into(),
            on,
        }
    }

    /// The joined table name, or `None` for a derived table.
    pub fn table(&self) -> Option<&str> {
        match &self.source {
            JoinSource::Table(t) => Some(t),
            JoinSource::Subquery(_) => None,
        }
    }

    /// Generate the JOIN SQL, appending bound values to `params`.
    ///
    /// The rendered clause starts with a space so it can be appended to a
    /// FROM clause directly.
    pub fn build_with_dialect(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let source = match &self.source {
            JoinSource::Table(table) => dialect.quote_identifier(table),
            JoinSource::Subquery(query) => format!("({})", query.build_into(dialect, params)),
        };
        let on_sql = self.on.build_with_dialect(dialect, params);
        format!(
            " {} {} AS {} ON {}",
            self.join_type.as_str(),
            source,
            dialect.quote_identifier(&self.alias),
            on_sql
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_join() {
        let join = Join::left(
            "posts",
            "Posts",
            Expr::qualified("Users", "id").eq(Expr::qualified("Posts", "user_id")),
        );
        let mut params = Vec::new();
        assert_eq!(
            join.build_with_dialect(Dialect::Sqlite, &mut params),
            " LEFT JOIN \"posts\" AS \"Posts\" ON \"Users\".\"id\" = \"Posts\".\"user_id\""
        );
        assert_eq!(join.table(), Some("posts"));
    }

    #[test]
    fn derived_table_join_shares_parameters() {
        let inner = SelectQuery::new("tags", "Tags")
            .field("id", Expr::qualified("Tags", "id"))
            .filter(Expr::qualified("Tags", "tag").eq("x"));
        let join = Join::subquery(
            JoinType::Inner,
            inner,
            "T",
            Expr::qualified("T", "id").eq(Expr::lit(5)),
        );
        let mut params = vec![Value::Int(1)];
        let sql = join.build_with_dialect(Dialect::Sqlite, &mut params);
        assert_eq!(
            sql,
            " INNER JOIN (SELECT \"Tags\".\"id\" AS \"id\" FROM \"tags\" AS \"Tags\" \
             WHERE \"Tags\".\"tag\" = ?2) AS \"T\" ON \"T\".\"id\" = ?3"
        );
        assert_eq!(params.len(), 3);
        assert!(join.table().is_none());
    }
}
