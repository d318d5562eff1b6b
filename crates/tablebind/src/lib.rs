//! tablebind - declarative model-to-table binding for Rust.
//!
//! tablebind maps plain structs onto relational tables and keeps them in sync:
//!
//! - Declarative models via `#[derive(Model)]`, resolved once into cached
//!   metadata
//! - One-to-one, many-to-one, one-to-many and many-to-many relations, loaded
//!   eagerly or on first access
//! - An identity map: one live instance per `(type, id)` per session
//! - Change tracking, so `save` writes only the columns that changed and
//!   reconciles child collections and link tables
//! - Lifecycle hooks, custom factories and JSON serialization
//!
//! # Quick Start
//!
//! ```ignore
//! use tablebind::prelude::*;
//!
//! #[derive(Model, Debug, Default)]
//! #[orm(table = "modelsA")]
//! struct ModelA {
//!     state: ModelState,
//!     model_a_id: Option<i64>,
//!     name: String,
//!     #[orm(one_to_many)]
//!     children: RelatedMany<ModelB>,
//! }
//!
//! #[derive(Model, Debug, Default)]
//! #[orm(table = "modelsB")]
//! struct ModelB {
//!     state: ModelState,
//!     model_b_id: Option<i64>,
//!     description: String,
//!     #[orm(many_to_one(eager))]
//!     parent: Related<ModelA>,
//! }
//!
//! fn main() -> Result<()> {
//!     let session = Session::new(SqliteConnection::open_memory()?);
//!
//!     let a = session.create(ModelA { name: "test".into(), ..Default::default() })?;
//!     assert!(session.save(&a)?);
//!
//!     let same = session.get::<ModelA>(a.id().unwrap_or_default())?;
//!     assert!(same.ptr_eq(&a));
//!
//!     a.borrow_mut().name = "renamed".into();
//!     assert!(session.has_changed(&a, "name")?);
//!     session.save(&a)?;
//!     Ok(())
//! }
//! ```
//!
//! Code generated by the derive macros refers to `tablebind_core`, so crates
//! deriving models depend on `tablebind-core` alongside this one.

pub use tablebind_core::{
    AnyModel, AnyModelRef, BackedEnum, Connection, CreatedAt, Dialect, Error, Extend, ExtendType,
    FactoryOptions, HookKind, LoadingMode, Model, ModelCollection, ModelConfig, ModelFactory,
    ModelRef, ModelState, ModelType, PropertyConfig, QueryData, Related, RelatedMany,
    RelationConfig, RelationKind, Resolve, Result, Row, UpdatedAt, Validation, ValidationError,
    Value,
};

pub use tablebind_macros::{BackedEnum, Model};

pub use tablebind_query::{Condition, Delete, Insert, Join, OrderBy, OrderDirection, Select, Update};

pub use tablebind_session::{FieldState, LinkOp, ModelQuery, Session, SessionConfig};

pub use tablebind_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

// The member crates, for drivers, custom factories and tooling.
pub use {tablebind_core, tablebind_query, tablebind_session, tablebind_sqlite};

/// Everything a typical application needs.
///
/// ```ignore
/// use tablebind::prelude::*;
/// ```
pub mod prelude {
    pub use tablebind_core::{
        CreatedAt, Error, Extend, ExtendType, FactoryOptions, Model, ModelCollection, ModelRef,
        ModelState, ModelType, QueryData, Related, RelatedMany, Resolve, Result, Row, UpdatedAt,
        Value,
    };

    pub use tablebind_macros::{BackedEnum, Model};

    pub use tablebind_session::{ModelQuery, Session, SessionConfig};

    pub use tablebind_sqlite::SqliteConnection;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[derive(Debug, Default, Model)]
    #[orm(table = "notes")]
    struct Note {
        state: ModelState,
        note_id: Option<i64>,
        body: String,
    }

    #[test]
    fn prelude_is_enough_for_a_round_trip() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE notes (note_id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .unwrap();
        let session = Session::new(conn);

        let note = session
            .create(Note {
                body: "hello".into(),
                ..Note::default()
            })
            .unwrap();
        assert!(session.save(&note).unwrap());
        let id = note.id().unwrap();

        let again = session.get::<Note>(id).unwrap();
        assert!(again.ptr_eq(&note));
        assert_eq!(session.metadata::<Note>().unwrap().primary_key, "note_id");
    }

    #[test]
    fn reports_linked_sqlite() {
        assert!(tablebind_sqlite::sqlite_version().starts_with('3'));
    }
}
