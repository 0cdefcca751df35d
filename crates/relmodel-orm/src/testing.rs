//! Recording connection and table fixtures for unit tests.

use crate::datasource::Datasource;
use crate::registry::TableRegistry;
use crate::table::TableConfig;
use relmodel_core::{ColumnSchema, Connection, IsolationLevel, Result, Row, SqlType, TableSchema, Value};
use relmodel_query::Dialect;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// SELECTs, in order
    pub queries: Vec<(String, Vec<Value>)>,
    /// Everything else, in order
    pub executed: Vec<(String, Vec<Value>)>,
    /// Result sets handed out to queries, front first
    pub responses: VecDeque<Vec<Row>>,
    /// Last generated insert id
    pub next_id: i64,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new(state: Arc<Mutex<MockState>>) -> Self {
        Self { state }
    }
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.queries.push((sql.to_string(), params.to_vec()));
        Ok(state.responses.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push((sql.to_string(), params.to_vec()));
        state.next_id += 1;
        Ok(state.next_id)
    }

    fn begin(&self, _isolation: IsolationLevel) -> Result<()> {
        self.state.lock().expect("lock poisoned").begins += 1;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.lock().expect("lock poisoned").commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.state.lock().expect("lock poisoned").rollbacks += 1;
        Ok(())
    }
}

/// A row from `(column, value)` pairs.
pub(crate) fn row(columns: &[(&str, Value)]) -> Row {
    let (names, values): (Vec<String>, Vec<Value>) = columns
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .unzip();
    Row::new(names, values)
}

/// A registry over a fresh mock connection, with no tables.
pub(crate) fn empty_registry() -> (Arc<TableRegistry>, Arc<Mutex<MockState>>) {
    let state = Arc::new(Mutex::new(MockState::default()));
    let conn = MockConnection::new(Arc::clone(&state));
    let registry = TableRegistry::new(Datasource::new(Arc::new(conn), Dialect::Sqlite));
    (registry, state)
}

/// Users, Posts, Tags, Profiles and Comments:
///
/// - Users hasOne Profiles, hasMany Posts (dependent)
/// - Posts belongsTo Users, belongsToMany Tags through PostsTags, hasMany
///   Comments (dependent)
pub(crate) fn blog_registry() -> (Arc<TableRegistry>, Arc<Mutex<MockState>>) {
    let (registry, state) = empty_registry();

    registry
        .add_with(
            TableConfig::new("Users").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("name", SqlType::Text))
                    .column(ColumnSchema::new("email", SqlType::Text).nullable()),
            ),
            |t| {
                t.has_one("Profiles");
                t.has_many("Posts").set_dependent(true);
                Ok(())
            },
        )
        .expect("register Users");

    registry
        .add_with(
            TableConfig::new("Posts").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
                    .column(ColumnSchema::new("title", SqlType::Text)),
            ),
            |t| {
                t.belongs_to("Users");
                t.belongs_to_many("Tags");
                t.has_many("Comments").set_dependent(true);
                Ok(())
            },
        )
        .expect("register Posts");

    registry
        .add(
            TableConfig::new("Tags").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("tag", SqlType::Text)),
            ),
        )
        .expect("register Tags");

    registry
        .add(
            TableConfig::new("PostsTags").schema(
                TableSchema::new()
                    .column(ColumnSchema::new("post_id", SqlType::Integer).primary_key())
                    .column(ColumnSchema::new("tag_id", SqlType::Integer).primary_key()),
            ),
        )
        .expect("register PostsTags");

    registry
        .add(
            TableConfig::new("Profiles").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
                    .column(ColumnSchema::new("bio", SqlType::Text).nullable()),
            ),
        )
        .expect("register Profiles");

    registry
        .add(
            TableConfig::new("Comments").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("post_id", SqlType::Integer))
                    .column(ColumnSchema::new("body", SqlType::Text)),
            ),
        )
        .expect("register Comments");

    (registry, state)
}
