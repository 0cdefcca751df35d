//! Connection routing and transaction scoping.

use relmodel_core::{Connection, IsolationLevel, Result};
use relmodel_query::Dialect;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which connection an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionRole {
    /// Reads; served by the read replica when one is configured.
    Read,
    /// Writes and anything inside a transaction.
    #[default]
    Write,
}

/// The connections shared by the tables of one registry.
///
/// A datasource owns a write connection and optionally a separate read
/// connection. While a transaction is open every read is routed to the
/// write connection so it observes uncommitted changes.
///
/// Transactions nest by depth: only the outermost [`transactional`] call
/// issues `BEGIN` and `COMMIT`/`ROLLBACK`. A datasource is meant to be
/// driven by one thread at a time.
///
/// [`transactional`]: Datasource::transactional
pub struct Datasource {
    write: Arc<dyn Connection>,
    read: Option<Arc<dyn Connection>>,
    dialect: Dialect,
    isolation: IsolationLevel,
    depth: AtomicUsize,
}

impl Datasource {
    /// Create a datasource over a single connection.
    pub fn new(connection: Arc<dyn Connection>, dialect: Dialect) -> Self {
        Self {
            write: connection,
            read: None,
            dialect,
            isolation: IsolationLevel::default(),
            depth: AtomicUsize::new(0),
        }
    }

    /// Route reads outside transactions to a separate connection.
    #[must_use]
    pub fn with_read_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.read = Some(connection);
        self
    }

    /// Isolation level used by [`Datasource::transactional`].
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// SQL dialect of the connections.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The connection serving `role`.
    pub fn connection(&self, role: ConnectionRole) -> &dyn Connection {
        match (role, &self.read) {
            (ConnectionRole::Read, Some(read)) if !self.in_transaction() => read.as_ref(),
            _ => self.write.as_ref(),
        }
    }

    /// Whether a [`Datasource::transactional`] block is running.
    pub fn in_transaction(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Run `operation` inside a transaction.
    ///
    /// `Ok(true)` commits, `Ok(false)` rolls back and `Err` rolls back and
    /// propagates the error. Nested calls join the outer transaction and
    /// leave the final decision to it.
    pub fn transactional<F>(&self, operation: F) -> Result<bool>
    where
        F: FnOnce() -> Result<bool>,
    {
        let outermost = !self.in_transaction();
        if outermost {
            self.write.begin(self.isolation)?;
            tracing::debug!(isolation = self.isolation.as_sql(), "Transaction started");
        }

        self.depth.fetch_add(1, Ordering::SeqCst);
        let result = operation();
        self.depth.fetch_sub(1, Ordering::SeqCst);

        if !outermost {
            return result;
        }

        match result {
            Ok(true) => {
                self.write.commit()?;
                tracing::debug!("Transaction committed");
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!("Operation aborted, rolling back transaction");
                self.write.rollback()?;
                Ok(false)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Operation failed, rolling back transaction");
                if let Err(rollback_err) = self.write.rollback() {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("dialect", &self.dialect)
            .field("isolation", &self.isolation)
            .field("has_read_connection", &self.read.is_some())
            .field("depth", &self.depth.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
