//! SQLite connection implementation.
//!
//! Safe wrappers around SQLite's C API implementing the synchronous
//! [`Connection`] trait from tablebind-core.

// FFI casts match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

use tablebind_core::error::{ConnectionError, ConnectionErrorKind};
use tablebind_core::row::ColumnInfo;
use tablebind_core::{Connection, Dialect, Error, QueryErrorKind, Result, Row, Value};

use crate::{ffi, types};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:".
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds; 0 disables it.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Interpret the path as a URI.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access; the database must exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only touched while holding the mutex
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| connect_error("Invalid path: contains null byte".to_string()))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid pointers; the return code is checked
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db was allocated by open_v2 and must be closed even on failure
                unsafe {
                    let msg = ffi::error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            tracing::error!(path = %config.path, error = %msg, "Failed to open SQLite database");
            return Err(connect_error(format!("Failed to open database: {}", msg)));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, version = ffi::version(), "Opened SQLite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection lock poisoned".to_string(),
                source: None,
            })
        })
    }

    /// Execute SQL directly without binding (DDL, several statements).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock()?;
        exec(inner.db, sql)
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> Result<u64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) } as u64)
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().is_ok_and(|inner| inner.in_transaction)
    }

    fn transaction_statement(&self, sql: &str, opening: bool) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_transaction == opening {
            let message = if opening {
                "Already in a transaction"
            } else {
                "Not in a transaction"
            };
            return Err(Error::query(QueryErrorKind::Transaction, Some(sql), message));
        }
        exec(inner.db, sql)?;
        inner.in_transaction = opening;
        tracing::trace!(statement = sql, "Transaction state changed");
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock()?;
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            // SAFETY: stmt is valid, index in range
            .map(|i| {
                unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{i}"))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        while stmt.step()? {
            let values = (0..col_count)
                // SAFETY: step just returned SQLITE_ROW
                .map(|i| unsafe { types::read_column(stmt.raw, i) })
                .collect();
            rows.push(Row::with_columns(Arc::clone(&columns), values));
        }
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.lock()?;
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind(params)?;
        stmt.step()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) } as u64)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let inner = self.lock()?;
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind(params)?;
        stmt.step()?;
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(inner.db) };
        if changes == 0 {
            // an ignored conflict inserted nothing
            return Ok(0);
        }
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    fn last_insert_id(&self) -> Result<i64> {
        self.last_insert_rowid()
    }

    fn begin(&self) -> Result<()> {
        self.transaction_statement("BEGIN", true)
    }

    fn commit(&self) -> Result<()> {
        self.transaction_statement("COMMIT", false)
    }

    fn rollback(&self) -> Result<()> {
        self.transaction_statement("ROLLBACK", false)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if !inner.db.is_null() {
                // SAFETY: db is valid and not used after this point
                unsafe {
                    ffi::sqlite3_close(inner.db);
                }
            }
        }
    }
}

/// A prepared statement, finalized on drop.
struct Statement<'a> {
    db: *mut ffi::sqlite3,
    raw: *mut ffi::sqlite3_stmt,
    sql: &'a str,
}

impl<'a> Statement<'a> {
    fn prepare(db: *mut ffi::sqlite3, sql: &'a str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::query(QueryErrorKind::Syntax, Some(sql), "SQL contains null byte")
        })?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(last_error(db, sql));
        }
        Ok(Self { db, raw, sql })
    }

    fn bind(&self, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is valid, index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let msg = unsafe { ffi::error_message(self.db) };
                return Err(Error::query(
                    QueryErrorKind::Database,
                    Some(self.sql),
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(())
    }

    /// Advance; `true` while rows remain.
    fn step(&self) -> Result<bool> {
        // SAFETY: raw is valid
        match unsafe { ffi::sqlite3_step(self.raw) } {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            _ => Err(last_error(self.db, self.sql)),
        }
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // SAFETY: raw came from prepare_v2 and is finalized once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql)
        .map_err(|_| Error::query(QueryErrorKind::Syntax, Some(sql), "SQL contains null byte"))?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let msg = if errmsg.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        // SAFETY: errmsg was allocated by sqlite3_exec and is freed once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(Error::query(error_code_to_kind(rc), Some(sql), msg))
}

fn last_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (ffi::error_message(db), ffi::sqlite3_errcode(db)) };
    Error::query(error_code_to_kind(code), Some(sql), msg)
}

fn connect_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn people() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert_eq!(conn.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_insert_returns_rowid() {
        let conn = people();
        let sql = "INSERT INTO people (name) VALUES (?1)";
        assert_eq!(conn.insert(sql, &[Value::Text("Alice".into())]).unwrap(), 1);
        assert_eq!(conn.insert(sql, &[Value::Text("Bob".into())]).unwrap(), 2);
        assert_eq!(conn.last_insert_id().unwrap(), 2);
    }

    #[test]
    fn test_ignored_insert_returns_zero() {
        let conn = people();
        conn.execute_raw("INSERT INTO people (id, name) VALUES (1, 'Alice')").unwrap();
        let id = conn
            .insert(
                "INSERT OR IGNORE INTO people (id, name) VALUES (?1, ?2)",
                &[Value::BigInt(1), Value::Text("x".into())],
            )
            .unwrap();
        assert_eq!(id, 0);
    }

    #[test]
    fn test_parameterized_query() {
        let conn = people();
        conn.execute(
            "INSERT INTO people (name, age) VALUES (?1, ?2)",
            &[Value::Text("Alice".into()), Value::Int(30)],
        )
        .unwrap();

        let rows = conn
            .query("SELECT * FROM people WHERE name = ?1", &[Value::Text("Alice".into())])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("age"), Some(&Value::BigInt(30)));
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert!(conn.query_one("SELECT * FROM people WHERE id = 99", &[]).unwrap().is_none());
    }

    #[test]
    fn test_null_and_blob_round_trip() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE t (a TEXT, b BLOB)").unwrap();
        conn.execute("INSERT INTO t VALUES (?1, ?2)", &[Value::Null, Value::Bytes(vec![1, 2, 3])])
            .unwrap();
        let rows = conn.query("SELECT a, b FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_by_name("a"), Some(&Value::Null));
        assert_eq!(rows[0].get_by_name("b"), Some(&Value::Bytes(vec![1, 2, 3])));
    }

    #[test]
    fn test_dates_bind_as_text() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE t (d TEXT, ok INTEGER)").unwrap();
        let days = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
            .num_days() as i32;
        conn.execute("INSERT INTO t VALUES (?1, ?2)", &[Value::Date(days), Value::Bool(true)])
            .unwrap();
        let rows = conn.query("SELECT d, ok FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_by_name("d"), Some(&Value::Text("2024-02-29".into())));
        assert_eq!(rows[0].get_by_name("ok"), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_transaction() {
        let conn = people();

        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO people (name) VALUES (?1)", &[Value::Text("Alice".into())])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM people", &[]).unwrap().is_empty());

        conn.begin().unwrap();
        conn.execute("INSERT INTO people (name) VALUES (?1)", &[Value::Text("Bob".into())])
            .unwrap();
        conn.commit().unwrap();
        assert_eq!(conn.query("SELECT * FROM people", &[]).unwrap().len(), 1);

        assert!(conn.commit().is_err());
        conn.begin().unwrap();
        assert!(conn.begin().is_err());
    }

    #[test]
    fn test_constraint_error_kind() {
        let conn = people();
        conn.execute_raw("INSERT INTO people (id, name) VALUES (1, 'a')").unwrap();
        let err = conn
            .execute(
                "INSERT INTO people (id, name) VALUES (?1, ?2)",
                &[Value::BigInt(1), Value::Text("b".into())],
            )
            .unwrap_err();
        assert!(err.is_persistence());
        assert!(matches!(&err, Error::Query(q) if q.kind == QueryErrorKind::Constraint));
        assert!(err.sql().is_some());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("tablebind_ro_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&tmp);
        let path = tmp.to_string_lossy().to_string();

        let conn = SqliteConnection::open(&SqliteConfig::file(&path)).unwrap();
        conn.execute_raw("CREATE TABLE t (id INTEGER)").unwrap();
        drop(conn);

        let config = SqliteConfig::file(&path).flags(OpenFlags::read_only());
        let conn = SqliteConnection::open(&config).unwrap();
        assert!(conn.query("SELECT * FROM t", &[]).unwrap().is_empty());
        assert!(conn.execute_raw("INSERT INTO t VALUES (1)").is_err());

        drop(conn);
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn test_drop_releases_the_database() {
        let tmp = std::env::temp_dir().join(format!("tablebind_drop_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&tmp);
        let path = tmp.to_string_lossy().to_string();

        for round in 0..3_i64 {
            let conn = SqliteConnection::open_file(path.clone()).unwrap();
            conn.execute_raw("CREATE TABLE IF NOT EXISTS t (id INTEGER)").unwrap();
            conn.begin().unwrap();
            conn.execute("INSERT INTO t VALUES (?1)", &[Value::BigInt(round)]).unwrap();
            conn.commit().unwrap();
            drop(conn);
        }

        let conn = SqliteConnection::open_file(path.clone()).unwrap();
        assert_eq!(conn.query("SELECT id FROM t", &[]).unwrap().len(), 3);
        drop(conn);
        std::fs::remove_file(&tmp).unwrap();
    }
}
