//! Database connection contract.
//!
//! The engine talks to storage through the synchronous [`Connection`] trait:
//! plain statement execution, generated-key retrieval and flat
//! begin/commit/rollback transaction control. Calls block until the driver
//! returns.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// SQL dialect spoken by a connection.
///
/// Controls placeholder syntax and the few statements whose spelling differs
/// between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// SQLite (uses ?1, ?2 placeholders)
    #[default]
    Sqlite,
    /// PostgreSQL (uses $1, $2 placeholders)
    Postgres,
    /// MySQL (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }
}

/// A synchronous database connection.
///
/// Implementations are not expected to be shared across threads; a session
/// owns its connection for its whole lifetime.
pub trait Connection {
    /// The dialect used when building statements for this connection.
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the generated primary key.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        self.last_insert_id()
    }

    /// The primary key generated by the most recent INSERT.
    fn last_insert_id(&self) -> Result<i64>;

    /// Start a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&self) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        (**self).query_one(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        (**self).insert(sql, params)
    }

    fn last_insert_id(&self) -> Result<i64> {
        (**self).last_insert_id()
    }

    fn begin(&self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }
}
