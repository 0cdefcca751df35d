//! Core types and traits for relmodel.
//!
//! This crate provides the foundations the query builder and the ORM layer
//! are built on:
//!
//! - `Value` and `Row` for dynamically typed data
//! - `Entity` for records with dirty tracking and nested associations
//! - `TableSchema` and `SqlType` for column metadata and row type adapters
//! - `Connection` for blocking database access
//! - `Error` for the error taxonomy shared by every crate

pub mod connection;
pub mod entity;
pub mod error;
pub mod inflect;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use connection::{Connection, IsolationLevel};
pub use entity::{Entity, JOIN_DATA, MATCHING_DATA, Property};
pub use error::{Error, OrmError, OrmErrorKind, Result};
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{ColumnSchema, TableSchema};
pub use types::{SqlType, TypeMap};
pub use value::{Key, KeyPart, Value, key_of};
