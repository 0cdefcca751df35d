//! Error types for relmodel operations.
//!
//! Configuration and programming mistakes (an association name that does not
//! exist, a strategy a variant cannot use, two joins fighting over one alias)
//! surface as `Err(Error::Orm(..))`. Data-level failures during saves and
//! deletes do not use this type: they return `Ok(false)` with messages
//! attached to the offending entity.

use std::fmt;

/// The primary error type for all relmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Association, contain and registry configuration errors
    Orm(OrmError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection was closed or is unusable
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// BEGIN while a transaction is already open on the connection
    AlreadyActive,
    /// COMMIT or ROLLBACK without an open transaction
    NotActive,
}

/// Configuration error raised by the table, association and query layers.
#[derive(Debug)]
pub struct OrmError {
    pub kind: OrmErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrmErrorKind {
    /// A contain or join path names an association the table does not have
    UnknownAssociation,
    /// A strategy outside the association variant's valid set
    InvalidStrategy,
    /// Two different joins claim the same alias in one statement
    JoinAliasNotUnique,
    /// A table alias registered twice
    DuplicateTable,
    /// A table alias that was never registered
    MissingTable,
    /// An operation that needs a primary key on a table without one
    MissingPrimaryKey,
    /// A malformed contain specification
    InvalidContain,
}

impl Error {
    /// Build an ORM configuration error.
    pub fn orm(kind: OrmErrorKind, message: impl Into<String>) -> Self {
        Error::Orm(OrmError {
            kind,
            message: message.into(),
        })
    }

    /// The ORM error kind, if this is a configuration error.
    pub fn orm_kind(&self) -> Option<OrmErrorKind> {
        match self {
            Error::Orm(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Is this an unknown-association error?
    pub fn is_unknown_association(&self) -> bool {
        self.orm_kind() == Some(OrmErrorKind::UnknownAssociation)
    }

    /// Is this an invalid-strategy error?
    pub fn is_invalid_strategy(&self) -> bool {
        self.orm_kind() == Some(OrmErrorKind::InvalidStrategy)
    }

    /// Is this a duplicate join alias error?
    pub fn is_alias_not_unique(&self) -> bool {
        self.orm_kind() == Some(OrmErrorKind::JoinAliasNotUnique)
    }

    /// Is this a constraint violation reported by the database?
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.kind == QueryErrorKind::Constraint)
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Orm(e) => write!(f, "{}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (in `{}`)", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            OrmErrorKind::UnknownAssociation => "Unknown association",
            OrmErrorKind::InvalidStrategy => "Invalid strategy",
            OrmErrorKind::JoinAliasNotUnique => "Join alias not unique",
            OrmErrorKind::DuplicateTable => "Duplicate table",
            OrmErrorKind::MissingTable => "Missing table",
            OrmErrorKind::MissingPrimaryKey => "Missing primary key",
            OrmErrorKind::InvalidContain => "Invalid contain",
        };
        write!(f, "{}: {}", label, self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<OrmError> for Error {
    fn from(err: OrmError) -> Self {
        Error::Orm(err)
    }
}

/// Result type alias for relmodel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orm_kind_predicates() {
        let err = Error::orm(OrmErrorKind::JoinAliasNotUnique, "alias `Authors` already joined");
        assert!(err.is_alias_not_unique());
        assert!(!err.is_unknown_association());
        assert_eq!(
            err.to_string(),
            "Join alias not unique: alias `Authors` already joined"
        );

        let err = Error::orm(OrmErrorKind::UnknownAssociation, "Users is not associated with Foo");
        assert!(err.is_unknown_association());
        assert_eq!(err.orm_kind(), Some(OrmErrorKind::UnknownAssociation));
    }

    #[test]
    fn constraint_and_sql_helpers() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO t VALUES (?1)".to_string()),
            message: "NOT NULL constraint failed: t.a".to_string(),
            source: None,
        });
        assert!(err.is_constraint_violation());
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (?1)"));
        assert!(err.orm_kind().is_none());
    }
}
