//! Identity map: at most one live instance per `(model type, id)`.
//!
//! Every instance the session hands out, whether fetched by id, built from a
//! query row or freshly inserted, is registered here. Later lookups for the
//! same key return the same shared handle, so a change made through one
//! reference is visible through all of them.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = InstanceRegistry::new();
//! registry.insert(model_type, 1, instance.clone());
//! assert!(registry.get(model_type, 1).unwrap().ptr_eq(&instance));
//! ```

use std::collections::{BTreeMap, HashMap};

use tablebind_core::{AnyModelRef, ModelType};

/// Registry of live instances, keyed by model type and primary key.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<ModelType, BTreeMap<i64, AnyModelRef>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered instance for `(model, id)`, if any.
    pub fn get(&self, model: ModelType, id: i64) -> Option<AnyModelRef> {
        self.instances.get(&model)?.get(&id).cloned()
    }

    pub fn contains(&self, model: ModelType, id: i64) -> bool {
        self.instances
            .get(&model)
            .is_some_and(|by_id| by_id.contains_key(&id))
    }

    /// Register an instance, replacing any previous one with the same key.
    pub fn insert(&mut self, model: ModelType, id: i64, instance: AnyModelRef) {
        tracing::trace!(model = model.name(), id, "Registering instance");
        self.instances.entry(model).or_default().insert(id, instance);
    }

    pub fn remove(&mut self, model: ModelType, id: i64) -> Option<AnyModelRef> {
        let by_id = self.instances.get_mut(&model)?;
        let removed = by_id.remove(&id);
        if by_id.is_empty() {
            self.instances.remove(&model);
        }
        if removed.is_some() {
            tracing::trace!(model = model.name(), id, "Unregistered instance");
        }
        removed
    }

    /// Forget registered instances, for one type or for all of them.
    pub fn clear(&mut self, model: Option<ModelType>) {
        match model {
            Some(model) => {
                self.instances.remove(&model);
            }
            None => self.instances.clear(),
        }
    }

    /// Number of registered instances across all types.
    pub fn len(&self) -> usize {
        self.instances.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
