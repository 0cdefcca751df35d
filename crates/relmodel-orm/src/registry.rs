//! Alias-keyed table registry.

use crate::datasource::{ConnectionRole, Datasource};
use crate::table::{Table, TableConfig};
use relmodel_core::{Error, OrmErrorKind, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// Owns every table of an application and the datasource they share.
///
/// Associations refer to their target by alias and resolve it here on first
/// use, so tables may be registered in any order.
#[derive(Debug)]
pub struct TableRegistry {
    datasource: Datasource,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    this: Weak<TableRegistry>,
}

impl TableRegistry {
    /// Create an empty registry.
    pub fn new(datasource: Datasource) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            datasource,
            tables: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// The shared datasource.
    pub fn datasource(&self) -> &Datasource {
        &self.datasource
    }

    /// Register a table without associations.
    pub fn add(&self, config: TableConfig) -> Result<Arc<Table>> {
        self.add_with(config, |_| Ok(()))
    }

    /// Register a table, letting `configure` declare its associations,
    /// rules, listeners and finders before it is shared.
    #[tracing::instrument(level = "debug", skip(self, config, configure), fields(alias = %config.alias))]
    pub fn add_with<F>(&self, config: TableConfig, configure: F) -> Result<Arc<Table>>
    where
        F: FnOnce(&mut Table) -> Result<()>,
    {
        if self.has(&config.alias) {
            return Err(duplicate(&config.alias));
        }

        let mut table = Table::new(config, self.this.clone());
        configure(&mut table)?;
        let table = Arc::new(table);

        let mut tables = self.write_tables()?;
        if tables.contains_key(table.alias()) {
            return Err(duplicate(table.alias()));
        }
        tables.insert(table.alias().to_string(), Arc::clone(&table));
        tracing::debug!(
            table = table.table(),
            associations = table.associations().len(),
            "Table registered"
        );
        Ok(table)
    }

    /// Look up a table by alias.
    pub fn get(&self, alias: &str) -> Result<Arc<Table>> {
        self.read_tables()?.get(alias).cloned().ok_or_else(|| {
            Error::orm(
                OrmErrorKind::MissingTable,
                format!("no table registered under alias `{alias}`"),
            )
        })
    }

    /// Whether an alias is registered.
    pub fn has(&self, alias: &str) -> bool {
        self.read_tables()
            .map(|tables| tables.contains_key(alias))
            .unwrap_or(false)
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .read_tables()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        aliases.sort();
        aliases
    }

    /// Return the table registered under `config.alias`, registering it
    /// from `config` first when missing.
    pub(crate) fn get_or_add(&self, config: TableConfig) -> Result<Arc<Table>> {
        let mut tables = self.write_tables()?;
        if let Some(table) = tables.get(&config.alias) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(Table::new(config, self.this.clone()));
        tracing::debug!(alias = table.alias(), "Generated table registered");
        tables.insert(table.alias().to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Run `CREATE TABLE` for every registered table, in alias order.
    pub fn create_tables(&self) -> Result<()> {
        let conn = self.datasource.connection(ConnectionRole::Write);
        for alias in self.aliases() {
            let table = self.get(&alias)?;
            let sql = table.schema().create_table_sql(table.table());
            tracing::trace!(sql = %sql, "Creating table");
            conn.execute(&sql, &[])?;
        }
        Ok(())
    }

    fn read_tables(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Table>>>> {
        self.tables
            .read()
            .map_err(|_| Error::Custom("table registry lock poisoned".to_string()))
    }

    fn write_tables(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Table>>>> {
        self.tables
            .write()
            .map_err(|_| Error::Custom("table registry lock poisoned".to_string()))
    }
}

fn duplicate(alias: &str) -> Error {
    Error::orm(
        OrmErrorKind::DuplicateTable,
        format!("a table is already registered under alias `{alias}`"),
    )
}
