//! SQL column types and the type adapters used while parsing rows.

use crate::value::Value;
use std::collections::HashMap;

/// SQL data types understood by the type adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Decimal,
    Boolean,
    Text,
    Blob,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Json => "JSON",
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::BigInt | SqlType::Double | SqlType::Decimal
        )
    }

    /// Convert a raw driver value into this column's typed representation.
    ///
    /// Drivers with a narrow storage model (SQLite stores booleans as
    /// integers and JSON as text) hand back loosely typed values; this is
    /// where they are tightened. Values that cannot be converted are returned
    /// unchanged.
    pub fn to_value(self, raw: Value) -> Value {
        if raw.is_null() {
            return raw;
        }
        match (self, raw) {
            (SqlType::Integer | SqlType::BigInt, Value::Int(v)) => Value::BigInt(i64::from(v)),
            (SqlType::Integer | SqlType::BigInt, Value::Text(s)) => match s.parse::<i64>() {
                Ok(v) => Value::BigInt(v),
                Err(e) => {
                    tracing::warn!(value = %s, error = %e, "Integer column held non-numeric text");
                    Value::Text(s)
                }
            },
            (SqlType::Boolean, Value::Int(v)) => Value::Bool(v != 0),
            (SqlType::Boolean, Value::BigInt(v)) => Value::Bool(v != 0),
            (SqlType::Double, Value::Int(v)) => Value::Double(f64::from(v)),
            (SqlType::Double, Value::BigInt(v)) => Value::Double(v as f64),
            (SqlType::Decimal, Value::Double(v)) => Value::Decimal(v.to_string()),
            (SqlType::Decimal, Value::Text(s)) => Value::Decimal(s),
            (SqlType::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(json) => Value::Json(json),
                Err(e) => {
                    tracing::warn!(error = %e, "JSON column held unparseable text");
                    Value::Text(s)
                }
            },
            (SqlType::Blob, Value::Text(s)) => Value::Bytes(s.into_bytes()),
            (_, other) => other,
        }
    }
}

/// Column-name to type mapping for one result set.
///
/// Keys are the selected column aliases (`Users__id`); columns with no entry
/// pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    types: HashMap<String, SqlType>,
}

impl TypeMap {
    /// Create an empty type map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the type of one selected column.
    pub fn insert(&mut self, column: impl Into<String>, sql_type: SqlType) {
        self.types.insert(column.into(), sql_type);
    }

    /// Look up a column type.
    pub fn get(&self, column: &str) -> Option<SqlType> {
        self.types.get(column).copied()
    }

    /// Convert a raw value for `column`.
    pub fn cast(&self, column: &str, raw: Value) -> Value {
        match self.get(column) {
            Some(sql_type) => sql_type.to_value(raw),
            None => raw,
        }
    }

    /// Merge another map into this one; existing entries are kept.
    pub fn extend_from(&mut self, other: &TypeMap) {
        for (k, v) in &other.types {
            self.types.entry(k.clone()).or_insert(*v);
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
