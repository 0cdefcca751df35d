//! relmodel - association-aware table mapping for SQL databases.
//!
//! relmodel maps database tables to dynamically typed entities and lets
//! queries pull in related rows by association name:
//!
//! - belongsTo, hasOne, hasMany and belongsToMany associations
//! - Contain trees that load nested associations with JOINs or batched
//!   follow-up queries
//! - Filtering on related rows with `matching` and `not_matching`
//! - Cascading saves and deletes in one transaction
//! - Application rules and lifecycle listeners per table
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//! use relmodel_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! let registry = TableRegistry::new(Datasource::new(Arc::new(conn), Dialect::Sqlite));
//!
//! registry.add_with(
//!     TableConfig::new("Users").schema(
//!         TableSchema::new().id().column(ColumnSchema::new("name", SqlType::Text)),
//!     ),
//!     |t| {
//!         t.has_many("Posts").set_dependent(true);
//!         Ok(())
//!     },
//! )?;
//! registry.add_with(
//!     TableConfig::new("Posts").schema(
//!         TableSchema::new()
//!             .id()
//!             .column(ColumnSchema::new("user_id", SqlType::Integer))
//!             .column(ColumnSchema::new("title", SqlType::Text)),
//!     ),
//!     |t| {
//!         t.belongs_to("Users");
//!         Ok(())
//!     },
//! )?;
//! registry.create_tables()?;
//!
//! let users = registry.get("Users")?;
//! let mut user = users.new_entity();
//! user.set("name", "ada");
//! user.set_many("posts", vec![Entity::from_values([("title", "hello")])]);
//! users.save(&mut user, &SaveOptions::default())?;
//!
//! let found = users
//!     .find()
//!     .contain("Posts")
//!     .where_(Expr::col("name").eq("ada"))
//!     .all()?;
//! ```

// Re-export all public types from sub-crates
pub use relmodel_core::{
    ColumnSchema, Connection, Entity, Error, IsolationLevel, JOIN_DATA, MATCHING_DATA,
    OrmErrorKind, Property, Result, Row, SqlType, TableSchema, Value,
};

pub use relmodel_query::{Dialect, Expr, JoinType, OrderBy, OrderDirection};

pub use relmodel_orm::{
    Associated, Association, AssociationKind, ConnectionRole, ContainNode, ContainTree,
    Datasource, DeleteOptions, Query, ResultIter, Rule, RuleContext, RuleMode, RuleScope,
    RulesChecker, SaveOptions, SaveStrategy, Strategy, Table, TableConfig, TableListener,
    TableRegistry,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        // Core
        ColumnSchema,
        Connection,
        // Tables and queries
        ContainNode,
        Datasource,
        DeleteOptions,
        Dialect,
        Entity,
        Error,
        Expr,
        JoinType,
        Query,
        Result,
        Rule,
        SaveOptions,
        SqlType,
        Strategy,
        Table,
        TableConfig,
        TableListener,
        TableRegistry,
        TableSchema,
        Value,
    };
    pub use std::sync::Arc;
}
