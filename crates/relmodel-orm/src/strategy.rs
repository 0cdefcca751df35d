//! Eager loading strategies.

use relmodel_core::{Error, OrmErrorKind, Result};
use std::fmt;
use std::str::FromStr;

/// How the rows of an association are fetched while eager loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Joined into the parent query; one row per parent.
    Join,
    /// A second query filtered by the collected parent keys.
    Select,
    /// A second query filtered by the parent query itself.
    Subquery,
}

impl Strategy {
    /// Lowercase name used in configuration and messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::Join => "join",
            Strategy::Select => "select",
            Strategy::Subquery => "subquery",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "join" => Ok(Strategy::Join),
            "select" => Ok(Strategy::Select),
            "subquery" => Ok(Strategy::Subquery),
            other => Err(Error::orm(
                OrmErrorKind::InvalidStrategy,
                format!("unknown loading strategy `{other}`"),
            )),
        }
    }
}
