//! Relation and extend field slots.
//!
//! - [`Related<T>`]: a single related model (one-to-one, many-to-one)
//! - [`RelatedMany<T>`]: a collection of related models (one-to-many,
//!   many-to-many)
//! - [`Extend<E>`]: a value object that reads and writes several columns of
//!   the owning row
//!
//! Relation slots never hold a reference to the session. An unloaded slot
//! holds a [`Loader`], a plain description of how to fetch its value; the
//! session runs it on first access and [`fill`](RelationSlot::fill)s the slot.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::collection::{CollectionType, ModelCollection};
use crate::declaration::FactoryBinding;
use crate::error::{Error, Result, TypeError};
use crate::field::{FieldSlot, TypeInfo, TypeKind};
use crate::model::{AnyModelRef, Model, ModelRef, ModelType};
use crate::row::Row;
use crate::value::Value;

/// Column name to value, as written by an INSERT or UPDATE.
pub type QueryData = BTreeMap<String, Value>;

/// How a relation's value is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    /// Call a factory method on the owner.
    FactoryMethod(String),
    /// Load the target by primary key (to-one).
    ById {
        id: Option<i64>,
        nullable: bool,
        factory: Option<FactoryBinding>,
    },
    /// Load all targets whose `column` equals the owner id (one-to-many).
    ByForeignKey { column: String, owner_id: i64 },
    /// Load targets through a link table (many-to-many).
    ThroughLink {
        through: String,
        local_key: String,
        foreign_key: String,
        owner_id: i64,
    },
}

/// A deferred relation load, bound to a field during hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct Loader {
    pub field: String,
    pub source: LoadSource,
}

impl Loader {
    pub fn new(field: impl Into<String>, source: LoadSource) -> Self {
        Self {
            field: field.into(),
            source,
        }
    }
}

/// The result of running a loader.
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<AnyModelRef>),
    Many(Vec<(i64, AnyModelRef)>),
}

/// What a relation slot currently holds, reduced to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationState {
    NotLoaded,
    One(Option<i64>),
    Many(Vec<i64>),
}

/// Type-erased access to a relation field.
pub trait RelationSlot {
    fn target(&self) -> ModelType;

    fn is_collection(&self) -> bool;

    fn state(&self) -> RelationState;

    fn is_loaded(&self) -> bool {
        self.state() != RelationState::NotLoaded
    }

    /// Defer loading until first access.
    fn bind(&mut self, loader: Loader);

    /// Take the pending loader, if any, leaving the slot empty.
    fn take_loader(&mut self) -> Option<Loader>;

    /// Store a loaded value.
    fn fill(&mut self, value: RelationValue) -> Result<()>;

    /// The loaded value as erased handles, `None` while not loaded.
    fn value(&self) -> Option<RelationValue>;
}

fn wrong_shape(expected: &'static str, field: &RelationValue) -> Error {
    Error::Type(TypeError {
        expected,
        actual: match field {
            RelationValue::One(_) => "single model".to_string(),
            RelationValue::Many(_) => "model collection".to_string(),
        },
        column: None,
    })
}

enum OneState<T: Model> {
    Unloaded(Loader),
    Loaded {
        model: Option<ModelRef<T>>,
        /// Id captured at fill time, for models borrowed while being filled
        id: Option<i64>,
    },
}

/// A single related model.
pub struct Related<T: Model> {
    state: OneState<T>,
}

impl<T: Model> Related<T> {
    /// An empty, loaded relation.
    pub fn empty() -> Self {
        Self {
            state: OneState::Loaded {
                model: None,
                id: None,
            },
        }
    }

    pub fn new(model: ModelRef<T>) -> Self {
        let mut related = Self::empty();
        related.set(Some(model));
        related
    }

    /// The related model, if loaded and present.
    pub fn get(&self) -> Option<&ModelRef<T>> {
        match &self.state {
            OneState::Loaded { model, .. } => model.as_ref(),
            OneState::Unloaded(_) => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, OneState::Loaded { .. })
    }

    /// Replace the related model, discarding any pending load.
    pub fn set(&mut self, model: Option<ModelRef<T>>) {
        let id = model.as_ref().and_then(ModelRef::id);
        self.state = OneState::Loaded { model, id };
    }

    /// Id of the related model, when loaded.
    pub fn id(&self) -> Option<i64> {
        match &self.state {
            OneState::Loaded { model, id } => match model {
                Some(m) => m.try_borrow().map_or(*id, |m| m.id()),
                None => None,
            },
            OneState::Unloaded(_) => None,
        }
    }
}

impl<T: Model> Default for Related<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Model> Clone for Related<T> {
    fn clone(&self) -> Self {
        Self {
            state: match &self.state {
                OneState::Unloaded(loader) => OneState::Unloaded(loader.clone()),
                OneState::Loaded { model, id } => OneState::Loaded {
                    model: model.clone(),
                    id: *id,
                },
            },
        }
    }
}

impl<T: Model> fmt::Debug for Related<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            OneState::Unloaded(_) => write!(f, "Related<{}>(unloaded)", self.target().name()),
            OneState::Loaded { .. } => {
                write!(f, "Related<{}>({:?})", self.target().name(), self.id())
            }
        }
    }
}

impl<T: Model> RelationSlot for Related<T> {
    fn target(&self) -> ModelType {
        ModelType::of::<T>()
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn state(&self) -> RelationState {
        match self.state {
            OneState::Unloaded(_) => RelationState::NotLoaded,
            OneState::Loaded { .. } => RelationState::One(self.id()),
        }
    }

    fn bind(&mut self, loader: Loader) {
        self.state = OneState::Unloaded(loader);
    }

    fn take_loader(&mut self) -> Option<Loader> {
        match std::mem::replace(&mut self.state, Self::empty().state) {
            OneState::Unloaded(loader) => Some(loader),
            loaded => {
                self.state = loaded;
                None
            }
        }
    }

    fn fill(&mut self, value: RelationValue) -> Result<()> {
        match value {
            RelationValue::One(None) => {
                self.state = OneState::Loaded {
                    model: None,
                    id: None,
                };
                Ok(())
            }
            RelationValue::One(Some(any)) => {
                let id = any.id();
                self.state = OneState::Loaded {
                    model: Some(any.downcast_or_err()?),
                    id,
                };
                Ok(())
            }
            many @ RelationValue::Many(_) => Err(wrong_shape("single model", &many)),
        }
    }

    fn value(&self) -> Option<RelationValue> {
        match &self.state {
            OneState::Loaded { model, .. } => {
                Some(RelationValue::One(model.as_ref().map(ModelRef::erase)))
            }
            OneState::Unloaded(_) => None,
        }
    }
}

impl<T: Model> FieldSlot for Related<T> {
    fn type_info() -> TypeInfo {
        TypeInfo::new(ModelType::of::<T>().name(), TypeKind::Model(ModelType::of::<T>()))
            .nullable()
    }

    fn as_relation(&self) -> Option<&dyn RelationSlot> {
        Some(self)
    }

    fn as_relation_mut(&mut self) -> Option<&mut dyn RelationSlot> {
        Some(self)
    }
}

enum ManyState<C> {
    Unset,
    Unloaded(Loader),
    Loaded(C),
}

/// A collection of related models.
///
/// `C` may be any [`CollectionType`] over `T`; it defaults to
/// [`ModelCollection<T>`].
pub struct RelatedMany<T: Model, C: CollectionType<Item = T> = ModelCollection<T>> {
    state: ManyState<C>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model, C: CollectionType<Item = T>> RelatedMany<T, C> {
    pub fn new(collection: C) -> Self {
        Self {
            state: ManyState::Loaded(collection),
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> Option<&C> {
        match &self.state {
            ManyState::Loaded(c) => Some(c),
            _ => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut C> {
        match &mut self.state {
            ManyState::Loaded(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ManyState::Loaded(_))
    }

    pub fn set(&mut self, collection: C) {
        self.state = ManyState::Loaded(collection);
    }

    /// The collection for modification. Unset relations start empty;
    /// unloaded ones must be loaded through the session first.
    pub fn loaded_mut(&mut self) -> Result<&mut C> {
        if let ManyState::Unloaded(loader) = &self.state {
            return Err(Error::Custom(format!(
                "relation '{}' must be loaded before it is modified",
                loader.field
            )));
        }
        if let ManyState::Unset = self.state {
            self.state = ManyState::Loaded(C::default());
        }
        match &mut self.state {
            ManyState::Loaded(c) => Ok(c),
            _ => Err(Error::Custom("relation is not loaded".to_string())),
        }
    }

    pub fn add(&mut self, model: ModelRef<T>) -> Result<()> {
        self.loaded_mut()?.collection_mut().add(model)
    }

    pub fn remove(&mut self, model: &ModelRef<T>) -> Result<()> {
        self.loaded_mut()?.collection_mut().remove(model);
        Ok(())
    }

    /// Ids of the loaded collection, or empty when not loaded.
    pub fn ids(&self) -> Vec<i64> {
        self.get().map(|c| c.collection().ids()).unwrap_or_default()
    }
}

impl<T: Model, C: CollectionType<Item = T>> Default for RelatedMany<T, C> {
    fn default() -> Self {
        Self {
            state: ManyState::Unset,
            _marker: PhantomData,
        }
    }
}

impl<T: Model, C: CollectionType<Item = T> + Clone> Clone for RelatedMany<T, C> {
    fn clone(&self) -> Self {
        Self {
            state: match &self.state {
                ManyState::Unset => ManyState::Unset,
                ManyState::Unloaded(loader) => ManyState::Unloaded(loader.clone()),
                ManyState::Loaded(c) => ManyState::Loaded(c.clone()),
            },
            _marker: PhantomData,
        }
    }
}

impl<T: Model, C: CollectionType<Item = T>> fmt::Debug for RelatedMany<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = ModelType::of::<T>().name();
        match &self.state {
            ManyState::Unset => write!(f, "RelatedMany<{name}>(unset)"),
            ManyState::Unloaded(_) => write!(f, "RelatedMany<{name}>(unloaded)"),
            ManyState::Loaded(c) => write!(f, "RelatedMany<{name}>({:?})", c.collection().ids()),
        }
    }
}

impl<T: Model, C: CollectionType<Item = T>> RelationSlot for RelatedMany<T, C> {
    fn target(&self) -> ModelType {
        ModelType::of::<T>()
    }

    fn is_collection(&self) -> bool {
        true
    }

    fn state(&self) -> RelationState {
        match &self.state {
            ManyState::Loaded(c) => RelationState::Many(c.collection().ids()),
            _ => RelationState::NotLoaded,
        }
    }

    fn bind(&mut self, loader: Loader) {
        self.state = ManyState::Unloaded(loader);
    }

    fn take_loader(&mut self) -> Option<Loader> {
        match std::mem::replace(&mut self.state, ManyState::Unset) {
            ManyState::Unloaded(loader) => Some(loader),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn fill(&mut self, value: RelationValue) -> Result<()> {
        match value {
            RelationValue::Many(entries) => {
                let mut collection = ModelCollection::new();
                for (id, any) in entries {
                    collection.insert_keyed(id, any.downcast_or_err()?);
                }
                self.state = ManyState::Loaded(C::from_collection(collection));
                Ok(())
            }
            one @ RelationValue::One(_) => Err(wrong_shape("model collection", &one)),
        }
    }

    fn value(&self) -> Option<RelationValue> {
        match &self.state {
            ManyState::Loaded(c) => Some(RelationValue::Many(
                c.collection()
                    .entries()
                    .iter()
                    .map(|(id, model)| (*id, model.erase()))
                    .collect(),
            )),
            _ => None,
        }
    }
}

impl<T: Model, C: CollectionType<Item = T>> FieldSlot for RelatedMany<T, C> {
    fn type_info() -> TypeInfo {
        TypeInfo::new(
            crate::naming::short_type_name(std::any::type_name::<C>()),
            TypeKind::Collection(ModelType::of::<T>()),
        )
    }

    fn is_unset(&self) -> bool {
        matches!(self.state, ManyState::Unset)
    }

    fn instantiate(&mut self) -> bool {
        self.state = ManyState::Loaded(C::default());
        true
    }

    fn as_relation(&self) -> Option<&dyn RelationSlot> {
        Some(self)
    }

    fn as_relation_mut(&mut self) -> Option<&mut dyn RelationSlot> {
        Some(self)
    }
}

/// A value object stored across columns of its owner's row.
///
/// The value is parsed from the owner's row on first access and contributes
/// its own columns when the owner is written.
pub trait ExtendType: Sized + 'static {
    fn parse_row(row: &Row) -> Result<Self>;

    fn add_query_data(&self, data: &mut QueryData);

    /// Instance used when the field is flagged `instantiate`.
    fn default_instance() -> Option<Self> {
        None
    }
}

/// Type-erased access to an extend field.
pub trait ExtendSlot {
    /// Give the slot the owner's row; the value is parsed lazily.
    fn bind_row(&mut self, row: Row);

    fn is_loaded(&self) -> bool;

    /// Current column data, parsing the row if needed. `None` if the slot
    /// holds neither a value nor a row.
    fn current(&self) -> Result<Option<QueryData>>;

    /// Column data as last loaded or saved.
    fn baseline(&self) -> Option<QueryData>;

    /// Make the current column data the new baseline.
    fn rebase(&mut self) -> Result<()>;
}

/// Field slot for an [`ExtendType`].
pub struct Extend<E: ExtendType> {
    row: Option<Row>,
    value: OnceCell<E>,
    baseline: OnceCell<QueryData>,
}

impl<E: ExtendType> Extend<E> {
    pub fn new(value: E) -> Self {
        Self {
            row: None,
            value: OnceCell::from(value),
            baseline: OnceCell::new(),
        }
    }

    /// The value, parsed from the owner's row on first access.
    pub fn get(&self) -> Result<&E> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let row = self.row.as_ref().ok_or_else(|| {
            Error::Custom(format!(
                "{} has no value and no row to parse",
                std::any::type_name::<E>()
            ))
        })?;
        let parsed = E::parse_row(row)?;
        let mut data = QueryData::new();
        parsed.add_query_data(&mut data);
        let _ = self.baseline.set(data);
        Ok(self.value.get_or_init(|| parsed))
    }

    pub fn get_mut(&mut self) -> Result<&mut E> {
        self.get()?;
        self.value
            .get_mut()
            .ok_or_else(|| Error::Custom("extend value vanished".to_string()))
    }

    pub fn set(&mut self, value: E) {
        self.value = OnceCell::from(value);
    }
}

impl<E: ExtendType> Default for Extend<E> {
    fn default() -> Self {
        Self {
            row: None,
            value: OnceCell::new(),
            baseline: OnceCell::new(),
        }
    }
}

impl<E: ExtendType + Clone> Clone for Extend<E> {
    fn clone(&self) -> Self {
        Self {
            row: self.row.clone(),
            value: self.value.clone(),
            baseline: self.baseline.clone(),
        }
    }
}

impl<E: ExtendType + fmt::Debug> fmt::Debug for Extend<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extend")
            .field("value", &self.value.get())
            .field("has_row", &self.row.is_some())
            .finish()
    }
}

impl<E: ExtendType> ExtendSlot for Extend<E> {
    fn bind_row(&mut self, row: Row) {
        self.row = Some(row);
        self.value = OnceCell::new();
        self.baseline = OnceCell::new();
    }

    fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    fn current(&self) -> Result<Option<QueryData>> {
        if self.value.get().is_none() && self.row.is_none() {
            return Ok(None);
        }
        let mut data = QueryData::new();
        self.get()?.add_query_data(&mut data);
        Ok(Some(data))
    }

    fn baseline(&self) -> Option<QueryData> {
        self.baseline.get().cloned()
    }

    fn rebase(&mut self) -> Result<()> {
        if let Some(data) = self.current()? {
            self.baseline = OnceCell::from(data);
        }
        Ok(())
    }
}

impl<E: ExtendType> FieldSlot for Extend<E> {
    fn type_info() -> TypeInfo {
        TypeInfo::new(
            crate::naming::short_type_name(std::any::type_name::<E>()),
            TypeKind::Extend,
        )
    }

    fn is_unset(&self) -> bool {
        self.row.is_none() && self.value.get().is_none()
    }

    fn instantiate(&mut self) -> bool {
        match E::default_instance() {
            Some(value) => {
                self.set(value);
                true
            }
            None => false,
        }
    }

    fn as_extend(&self) -> Option<&dyn ExtendSlot> {
        Some(self)
    }

    fn as_extend_mut(&mut self) -> Option<&mut dyn ExtendSlot> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Money {
        amount: i64,
        currency: String,
    }

    impl ExtendType for Money {
        fn parse_row(row: &Row) -> Result<Self> {
            Ok(Self {
                amount: row.get_named("amount")?,
                currency: row.get_named("currency")?,
            })
        }

        fn add_query_data(&self, data: &mut QueryData) {
            data.insert("amount".into(), Value::BigInt(self.amount));
            data.insert("currency".into(), Value::Text(self.currency.clone()));
        }
    }

    fn money_row() -> Row {
        Row::from_pairs([
            ("amount", Value::BigInt(5)),
            ("currency", Value::Text("EUR".into())),
        ])
    }

    #[test]
    fn extend_parses_lazily_and_tracks_baseline() {
        let mut slot = Extend::<Money>::default();
        assert!(slot.is_unset());
        slot.bind_row(money_row());
        assert!(!ExtendSlot::is_loaded(&slot));
        assert!(slot.baseline().is_none());

        assert_eq!(slot.get().unwrap().amount, 5);
        let baseline = slot.baseline().unwrap();
        assert_eq!(slot.current().unwrap(), Some(baseline.clone()));

        slot.get_mut().unwrap().amount = 7;
        assert_ne!(slot.current().unwrap(), Some(baseline));
        slot.rebase().unwrap();
        assert_eq!(slot.baseline().unwrap()["amount"], Value::BigInt(7));
    }

    #[test]
    fn extend_without_row_or_value() {
        let slot = Extend::<Money>::default();
        assert!(slot.get().is_err());
        assert_eq!(slot.current().unwrap(), None);
        let mut slot = slot;
        assert!(!slot.instantiate());
    }

    #[test]
    fn loader_equality() {
        let loader = Loader::new(
            "parent",
            LoadSource::ById {
                id: Some(1),
                nullable: true,
                factory: None,
            },
        );
        assert_eq!(loader.clone(), loader);
        assert_eq!(loader.field, "parent");
    }
}
