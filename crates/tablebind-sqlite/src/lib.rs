//! SQLite driver for tablebind.
//!
//! Implements the synchronous `Connection` trait from tablebind-core on top
//! of the `libsqlite3-sys` bindings (SQLite is compiled in via the `bundled`
//! feature).
//!
//! # Example
//!
//! ```rust,ignore
//! use tablebind_core::{Connection, Value};
//! use tablebind_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?1)", &[Value::Text("Alice".into())])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt`, `Interval` | INTEGER |
//! | `Double` | REAL |
//! | `Text`, `Json` | TEXT |
//! | `Bytes` | BLOB |
//! | `Date`, `Time`, `Timestamp` | TEXT (ISO-8601) |
//! | `Null` | NULL |

// FFI bindings require unsafe code
#![allow(unsafe_code)]

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// The linked SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
