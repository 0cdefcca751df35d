//! Tables, associations and eager loading for relmodel.
//!
//! `relmodel-orm` is the **mapping layer**. It turns registered tables and
//! their associations into SQL through `relmodel-query`, and turns result
//! rows back into nested `Entity` graphs.
//!
//! # Role In The Architecture
//!
//! - **Registry**: `TableRegistry` owns every `Table` of one datasource and
//!   resolves associations by alias.
//! - **Associations**: belongsTo, hasOne, hasMany and belongsToMany, each
//!   with join, eager-load, save and cascade-delete behavior.
//! - **Contain**: `Query::contain` declares which associations to load;
//!   joinable ones become JOINs, the rest run as one batched query per
//!   association.
//! - **Filtering**: `matching`, `not_matching` and `*_join_with` filter the
//!   root rows by their related rows.
//! - **Persistence**: `Table::save` and `Table::delete` walk the entity graph
//!   in dependency order inside one transaction.
//!
//! Statements run through the blocking `Connection` trait from
//! `relmodel-core`; `relmodel-sqlite` provides the SQLite driver.

pub mod association;
pub mod contain;
pub mod datasource;
mod eager;
pub mod listener;
pub mod persist;
pub mod query;
pub mod registry;
pub mod result;
pub mod rules;
pub mod strategy;
pub mod table;

#[cfg(test)]
mod testing;

pub use association::{Association, AssociationKind, SaveStrategy};
pub use contain::{ContainNode, ContainTree, QueryCallback};
pub use datasource::{ConnectionRole, Datasource};
pub use listener::TableListener;
pub use persist::{Associated, DeleteOptions, SaveOptions};
pub use query::Query;
pub use registry::TableRegistry;
pub use result::ResultIter;
pub use rules::{Rule, RuleContext, RuleMode, RuleScope, RulesChecker};
pub use strategy::Strategy;
pub use table::{Finder, Table, TableConfig};
