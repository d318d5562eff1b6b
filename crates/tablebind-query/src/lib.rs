//! SQL statement builders and the result cache for tablebind.
//!
//! `tablebind-query` is the **statement construction layer**. The session
//! turns model configuration into [`Select`], [`Insert`], [`Update`] and
//! [`Delete`] builders, renders them for the connection's [`Dialect`], and
//! runs the resulting `(sql, params)` pairs through the `Connection` trait
//! from `tablebind-core`.
//!
//! Reads may be served from a [`QueryCache`], whose entries are invalidated
//! by tag when the persister writes to a table.

pub mod builder;
pub mod cache;
pub mod clause;

pub use builder::{Delete, Insert, Select, Update};
pub use cache::{CachedResult, QueryCache, cache_key};
pub use clause::{Condition, Join, JoinKind, OrderBy, OrderDirection};
pub use tablebind_core::Dialect;
