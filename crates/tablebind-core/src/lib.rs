//! Core types and traits for tablebind.
//!
//! This crate provides the foundational abstractions the session builds on:
//!
//! - `Model` / `AnyModel` traits and the shared `ModelRef` handle
//! - field slots (`FieldSlot`), relation slots (`Related`, `RelatedMany`)
//!   and extend slots (`Extend`)
//! - model declarations and their resolved, serializable `ModelConfig`
//! - the synchronous `Connection` trait, `Row` and `Value`
//! - value coercion and field validation

pub mod coerce;
pub mod collection;
pub mod config;
pub mod connection;
pub mod declaration;
pub mod error;
pub mod factory;
pub mod field;
pub mod model;
pub mod naming;
pub mod relationship;
pub mod row;
pub mod timestamps;
pub mod validate;
pub mod value;

pub use collection::{CollectionType, ModelCollection};
pub use config::{Hooks, ModelConfig, PropertyConfig, RelationConfig};
pub use connection::{Connection, Dialect};
pub use declaration::{
    FactoryBinding, FieldDeclaration, HookKind, LoadingMode, ModelDeclaration,
    RelationDeclaration, RelationKind,
};
pub use error::{
    CollectionError, ConfigError, ConfigErrorKind, ConnectionError, ConnectionErrorKind, Error,
    FieldValidationError, NotFoundError, QueryError, QueryErrorKind, Result, TypeError,
    ValidationError, ValidationErrorKind,
};
pub use factory::{FactoryOptions, ModelFactory};
pub use field::{
    BackedEnum, ColumnType, FieldKind, FieldSlot, ScalarKind, TemporalKind, TypeInfo, TypeKind,
};
pub use model::{
    AnyModel, AnyModelRef, HookResult, IntoRelationValue, Model, ModelRef, ModelState, ModelType,
    Original, Resolve,
};
pub use relationship::{
    Extend, ExtendSlot, ExtendType, LoadSource, Loader, QueryData, Related, RelatedMany,
    RelationSlot, RelationState, RelationValue,
};
pub use row::Row;
pub use timestamps::{CreatedAt, UpdatedAt};
pub use validate::Validation;
pub use value::Value;

pub use serde_json;
