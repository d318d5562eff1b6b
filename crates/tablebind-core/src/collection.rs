//! Ordered, id-keyed collections of models.

use std::fmt;

use crate::error::{CollectionError, Error, Result};
use crate::model::{AnyModelRef, Model, ModelRef, ModelType};

/// An ordered set of models of one type, keyed by primary key.
///
/// Adding a model that is already present (same id) replaces it in place;
/// models without a primary key cannot be added.
pub struct ModelCollection<T: Model> {
    entries: Vec<(i64, ModelRef<T>)>,
}

impl<T: Model> ModelCollection<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a collection from loaded models.
    pub fn from_models(models: impl IntoIterator<Item = ModelRef<T>>) -> Result<Self> {
        let mut collection = Self::new();
        for model in models {
            collection.add(model)?;
        }
        Ok(collection)
    }

    /// Add a model, keyed by its current primary key.
    pub fn add(&mut self, model: ModelRef<T>) -> Result<()> {
        let id = model.id().ok_or_else(|| {
            Error::Collection(CollectionError::Uninitialized {
                model: ModelType::of::<T>().name().to_string(),
            })
        })?;
        self.insert_keyed(id, model);
        Ok(())
    }

    /// Add a model of erased type, checking it belongs in this collection.
    pub fn add_any(&mut self, model: &AnyModelRef) -> Result<()> {
        let typed = model.downcast::<T>().ok_or_else(|| {
            Error::Collection(CollectionError::TypeMismatch {
                expected: ModelType::of::<T>().name().to_string(),
                actual: model.model_type().name().to_string(),
            })
        })?;
        self.add(typed)
    }

    /// Insert under a known key without borrowing the model.
    pub fn insert_keyed(&mut self, id: i64, model: ModelRef<T>) {
        match self.entries.iter_mut().find(|(key, _)| *key == id) {
            Some(entry) => entry.1 = model,
            None => self.entries.push((id, model)),
        }
    }

    /// Remove a model by identity. Absent models are ignored.
    pub fn remove(&mut self, model: &ModelRef<T>) {
        match model.id() {
            Some(id) => self.remove_id(id),
            None => self.entries.retain(|(_, m)| !m.ptr_eq(model)),
        }
    }

    pub fn remove_id(&mut self, id: i64) {
        self.entries.retain(|(key, _)| *key != id);
    }

    pub fn get(&self, id: i64) -> Option<&ModelRef<T>> {
        self.entries.iter().find(|(key, _)| *key == id).map(|(_, m)| m)
    }

    pub fn contains(&self, model: &ModelRef<T>) -> bool {
        self.entries.iter().any(|(_, m)| m.ptr_eq(model))
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.entries.iter().any(|(key, _)| *key == id)
    }

    /// Primary keys in collection order.
    pub fn ids(&self) -> Vec<i64> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[(i64, ModelRef<T>)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelRef<T>> {
        self.entries.iter().map(|(_, m)| m)
    }

    /// First model matching the predicate.
    pub fn first(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<ModelRef<T>> {
        self.iter().find(|m| predicate(&m.borrow())).cloned()
    }

    /// Last model matching the predicate.
    pub fn last(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<ModelRef<T>> {
        self.entries
            .iter()
            .rev()
            .map(|(_, m)| m)
            .find(|m| predicate(&m.borrow()))
            .cloned()
    }

    /// A new collection with the models matching the predicate.
    #[must_use]
    pub fn filter(&self, mut predicate: impl FnMut(&T) -> bool) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, m)| predicate(&m.borrow()))
                .cloned()
                .collect(),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Vec<U> {
        self.iter().map(|m| f(&m.borrow())).collect()
    }
}

impl<T: Model> Default for ModelCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> Clone for ModelCollection<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: Model> fmt::Debug for ModelCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCollection")
            .field("model", &ModelType::of::<T>().name())
            .field("ids", &self.ids())
            .finish()
    }
}

impl<'a, T: Model> IntoIterator for &'a ModelCollection<T> {
    type Item = &'a ModelRef<T>;
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (i64, ModelRef<T>)>,
        fn(&'a (i64, ModelRef<T>)) -> &'a ModelRef<T>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        let model: fn(&'a (i64, ModelRef<T>)) -> &'a ModelRef<T> = |(_, m)| m;
        self.entries.iter().map(model)
    }
}

/// A collection type usable as the target of a to-many relation.
///
/// Implement this to expose domain-specific helpers on top of
/// [`ModelCollection`].
pub trait CollectionType: Default + 'static {
    type Item: Model;

    fn from_collection(collection: ModelCollection<Self::Item>) -> Self;

    fn collection(&self) -> &ModelCollection<Self::Item>;

    fn collection_mut(&mut self) -> &mut ModelCollection<Self::Item>;
}

impl<T: Model> CollectionType for ModelCollection<T> {
    type Item = T;

    fn from_collection(collection: ModelCollection<T>) -> Self {
        collection
    }

    fn collection(&self) -> &ModelCollection<T> {
        self
    }

    fn collection_mut(&mut self) -> &mut ModelCollection<T> {
        self
    }
}
