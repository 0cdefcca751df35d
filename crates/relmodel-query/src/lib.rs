//! SQL query builder for relmodel.
//!
//! `relmodel-query` is the **query construction layer**. It provides the
//! expression DSL and the SELECT/INSERT/UPDATE/DELETE builders the ORM layer
//! renders to SQL plus bound parameters.
//!
//! # Role In The Architecture
//!
//! - **Expression DSL**: `Expr` builds WHERE/ON/HAVING clauses safely.
//! - **Select**: `SelectQuery` is an inspectable, rewritable SELECT with
//!   aliased fields, table or derived-table joins, and nested `IN` subqueries.
//! - **Dialect support**: generates placeholders and identifier quoting for
//!   Postgres, MySQL, and SQLite.
//!
//! Rendered statements execute through the `Connection` trait from
//! `relmodel-core`.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod select;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use clause::{Limit, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Dialect, Expr};
pub use join::{Join, JoinSource, JoinType};
pub use select::{SelectField, SelectQuery};
