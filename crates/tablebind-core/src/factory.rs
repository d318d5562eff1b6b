//! Custom model factories.
//!
//! A model type can name a factory (`#[orm(factory = "...")]`). Relations
//! pointing at that type then construct their targets through the factory
//! registered under that name instead of loading them by id.

use crate::error::Result;
use crate::model::{AnyModelRef, ModelType, Resolve};

/// Options passed to a factory, from the binding's JSON object.
pub type FactoryOptions = serde_json::Map<String, serde_json::Value>;

/// Constructs model instances on behalf of the session.
pub trait ModelFactory {
    /// Produce the instance of `model` with the given id.
    fn get_by_id(
        &self,
        db: &dyn Resolve,
        model: ModelType,
        id: i64,
        options: &FactoryOptions,
    ) -> Result<AnyModelRef>;

    /// Produce every instance of `model`, keyed by id.
    fn get_all(
        &self,
        db: &dyn Resolve,
        model: ModelType,
        options: &FactoryOptions,
    ) -> Result<Vec<(i64, AnyModelRef)>> {
        let _ = (db, model, options);
        Ok(Vec::new())
    }
}

impl<F> ModelFactory for F
where
    F: Fn(&dyn Resolve, ModelType, i64, &FactoryOptions) -> Result<AnyModelRef>,
{
    fn get_by_id(
        &self,
        db: &dyn Resolve,
        model: ModelType,
        id: i64,
        options: &FactoryOptions,
    ) -> Result<AnyModelRef> {
        self(db, model, id, options)
    }
}
