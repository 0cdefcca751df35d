//! Table schema: the column list, types and nullability of one table.
//!
//! Association code consults the schema for two things: the column list used
//! by auto-fields, and foreign key nullability, which decides whether an
//! unlinked child row is detached or deleted.

use crate::types::SqlType;

/// Metadata about one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Database column name
    pub name: String,
    /// SQL type used for row conversion and DDL
    pub sql_type: SqlType,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Whether the database generates the value on insert
    pub auto_increment: bool,
}

impl ColumnSchema {
    /// Create a non-null column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Mark the column nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the column as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark the column auto-incrementing.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Ordered column list for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Shorthand for an auto-incrementing integer primary key named `id`.
    #[must_use]
    pub fn id(self) -> Self {
        self.column(
            ColumnSchema::new("id", SqlType::Integer)
                .primary_key()
                .auto_increment(),
        )
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up one column.
    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the schema has a column.
    pub fn has_column(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether a column accepts NULL. Unknown columns report `false`.
    pub fn is_nullable(&self, name: &str) -> bool {
        self.get(name).is_some_and(|c| c.nullable)
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Generate a `CREATE TABLE` statement for this schema.
    pub fn create_table_sql(&self, table: &str) -> String {
        let pk = self.primary_key();
        let single_auto_pk = pk.len() == 1
            && self
                .get(&pk[0])
                .is_some_and(|c| c.auto_increment && c.sql_type == SqlType::Integer);

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("\"{}\" {}", c.name, c.sql_type.sql_name());
                if single_auto_pk && c.primary_key {
                    def.push_str(" PRIMARY KEY AUTOINCREMENT");
                } else if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        if !single_auto_pk && !pk.is_empty() {
            let cols: Vec<String> = pk.iter().map(|c| format!("\"{c}\"")).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!("CREATE TABLE \"{}\" ({})", table, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posts() -> TableSchema {
        TableSchema::new()
            .id()
            .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
            .column(ColumnSchema::new("title", SqlType::Text))
    }

    #[test]
    fn lookups() {
        let schema = posts();
        assert_eq!(schema.primary_key(), vec!["id".to_string()]);
        assert!(schema.is_nullable("user_id"));
        assert!(!schema.is_nullable("title"));
        assert!(!schema.is_nullable("missing"));
        assert_eq!(schema.column_names(), vec!["id", "user_id", "title"]);
    }

    #[test]
    fn ddl_single_auto_pk() {
        assert_eq!(
            posts().create_table_sql("posts"),
            "CREATE TABLE \"posts\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"user_id\" INTEGER, \"title\" TEXT NOT NULL)"
        );
    }

    #[test]
    fn ddl_composite_pk() {
        let schema = TableSchema::new()
            .column(ColumnSchema::new("post_id", SqlType::Integer).primary_key())
            .column(ColumnSchema::new("tag_id", SqlType::Integer).primary_key());
        assert_eq!(
            schema.create_table_sql("posts_tags"),
            "CREATE TABLE \"posts_tags\" (\"post_id\" INTEGER NOT NULL, \
             \"tag_id\" INTEGER NOT NULL, PRIMARY KEY (\"post_id\", \"tag_id\"))"
        );
    }
}
