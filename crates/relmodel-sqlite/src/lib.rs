//! SQLite driver for relmodel.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides a SQLite database driver on top of `libsqlite3-sys`.
//! It implements the blocking `Connection` trait from relmodel-core so tables
//! and queries can run against it.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmodel_sqlite::SqliteConnection;
//! use relmodel_core::{Connection, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?1)", &[Value::from("Alice")])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text`, `Decimal` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//! | `Null` | NULL |
//!
//! # Thread Safety
//!
//! `SqliteConnection` is both `Send` and `Sync`, using internal mutex
//! synchronization to protect the underlying SQLite handle.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

use libsqlite3_sys as ffi;
use std::ffi::CStr;

/// The SQLite library version string.
pub fn sqlite_version() -> String {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe { CStr::from_ptr(ffi::sqlite3_libversion()) }
        .to_string_lossy()
        .into_owned()
}

/// The SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    // SAFETY: no preconditions
    unsafe { ffi::sqlite3_libversion_number() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
        assert!(sqlite_version_number() >= 3_000_000);
    }
}
