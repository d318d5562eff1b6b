//! Model traits and shared instance handles.
//!
//! A model is a plain struct deriving `Model` through
//! `tablebind-macros`. The derive generates two trait impls:
//!
//! - [`Model`]: static facts about the type (table, declaration)
//! - [`AnyModel`]: object-safe access to fields, hooks and factory methods,
//!   used by the session once the concrete type has been erased
//!
//! Instances loaded through a session are shared: every lookup of the same
//! `(type, id)` yields a handle to the same [`ModelRef`].
//!
//! # Example
//!
//! ```ignore
//! use tablebind::prelude::*;
//!
//! #[derive(Model, Default)]
//! #[orm(table = "modelsA", primary_key = "model_a_id")]
//! struct ModelA {
//!     #[orm(state)]
//!     state: ModelState,
//!     model_a_id: Option<i64>,
//!     name: String,
//!     age: i32,
//!     #[orm(one_to_many)]
//!     children: RelatedMany<ModelB>,
//! }
//! ```

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::collection::ModelCollection;
use crate::declaration::ModelDeclaration;
use crate::error::{Error, Result, TypeError};
use crate::field::FieldSlot;
use crate::naming::short_type_name;
use crate::relationship::RelationValue;
use crate::row::Row;
use crate::value::Value;

/// Static contract of a persistable model type.
pub trait Model: AnyModel + Default + Sized + 'static {
    /// The table this model maps to.
    const TABLE: &'static str;

    /// Field, relation and hook declarations for this type.
    fn declaration() -> ModelDeclaration;

    /// Invoke an associated (instance-free) hook such as an
    /// after-external-update handler.
    fn call_static_hook(name: &str, id: i64) -> Result<()> {
        let _ = id;
        Err(Error::Custom(format!(
            "{} has no static hook '{}'",
            short_type_name(std::any::type_name::<Self>()),
            name
        )))
    }
}

/// Object-safe view of a model instance.
pub trait AnyModel: Any {
    fn model_type(&self) -> ModelType;

    fn state(&self) -> &ModelState;

    fn state_mut(&mut self) -> &mut ModelState;

    fn field(&self, name: &str) -> Option<&dyn FieldSlot>;

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn FieldSlot>;

    /// Run a lifecycle hook method by name.
    fn call_hook(&mut self, method: &str) -> Result<()> {
        Err(Error::Custom(format!(
            "{} has no hook method '{}'",
            self.model_type().name(),
            method
        )))
    }

    /// Run a relation factory method by name.
    fn call_factory(&self, method: &str, db: &dyn Resolve) -> Result<RelationValue> {
        let _ = db;
        Err(Error::Custom(format!(
            "{} has no factory method '{}'",
            self.model_type().name(),
            method
        )))
    }

    /// Run a serialization extender by name.
    fn extend_serialization(
        &self,
        method: &str,
        data: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let _ = data;
        Err(Error::Custom(format!(
            "{} has no serialization method '{}'",
            self.model_type().name(),
            method
        )))
    }

    /// Primary key, once loaded or inserted.
    fn id(&self) -> Option<i64> {
        self.state().id()
    }
}

/// Baseline of one field, captured at load or save time.
#[derive(Debug, Clone, PartialEq)]
pub enum Original {
    /// Scalar, enum or temporal value
    Value(Value),
    /// Id of a to-one related model
    Id(Option<i64>),
    /// Ids of a to-many relation, in load order
    Ids(Vec<i64>),
}

/// Per-instance persistence bookkeeping embedded in every model.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    id: Option<i64>,
    row: Option<Row>,
    original: BTreeMap<String, Original>,
}

impl ModelState {
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    /// `true` once the instance has an identity in the database.
    pub fn is_loaded(&self) -> bool {
        self.id.is_some()
    }

    /// The row the instance was last hydrated from.
    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    pub fn set_row(&mut self, row: Row) {
        self.row = Some(row);
    }

    pub fn original(&self, field: &str) -> Option<&Original> {
        self.original.get(field)
    }

    pub fn set_original(&mut self, field: impl Into<String>, original: Original) {
        self.original.insert(field.into(), original);
    }

    pub fn remove_original(&mut self, field: &str) {
        self.original.remove(field);
    }

    pub fn originals(&self) -> &BTreeMap<String, Original> {
        &self.original
    }

    /// Forget everything tracked for this instance.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Runtime handle to a model type.
///
/// Carries the operations the session needs to work with a type it only
/// knows by value: creating blank instances, reading its declaration and
/// invoking its static hooks.
#[derive(Clone, Copy)]
pub struct ModelType {
    type_id: fn() -> TypeId,
    path: &'static str,
    table: &'static str,
    declaration: fn() -> ModelDeclaration,
    create: fn() -> AnyModelRef,
    static_hook: fn(&str, i64) -> Result<()>,
}

impl ModelType {
    pub fn of<M: Model>() -> Self {
        Self {
            type_id: TypeId::of::<M>,
            path: std::any::type_name::<M>(),
            table: M::TABLE,
            declaration: M::declaration,
            create: || AnyModelRef::new(M::default()),
            static_hook: M::call_static_hook,
        }
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    /// Short type name, e.g. `ModelA`.
    pub fn name(&self) -> &'static str {
        short_type_name(self.path)
    }

    /// Fully qualified type path.
    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn declaration(&self) -> ModelDeclaration {
        (self.declaration)()
    }

    /// Construct a blank, default-valued instance.
    pub fn create(&self) -> AnyModelRef {
        (self.create)()
    }

    pub fn call_static_hook(&self, name: &str, id: i64) -> Result<()> {
        (self.static_hook)(name, id)
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for ModelType {}

impl Hash for ModelType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id().hash(state);
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelType({})", self.name())
    }
}

/// Shared handle to a typed model instance.
pub struct ModelRef<M>(Rc<RefCell<M>>);

impl<M: Model> ModelRef<M> {
    pub fn new(model: M) -> Self {
        Self(Rc::new(RefCell::new(model)))
    }

    /// Immutably borrow the model.
    ///
    /// # Panics
    ///
    /// Panics if the model is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, M> {
        self.0.borrow()
    }

    /// Mutably borrow the model.
    ///
    /// # Panics
    ///
    /// Panics if the model is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, M> {
        self.0.borrow_mut()
    }

    pub fn try_borrow(&self) -> Option<Ref<'_, M>> {
        self.0.try_borrow().ok()
    }

    /// Primary key, or `None` for transient instances (or while the model is
    /// mutably borrowed elsewhere).
    pub fn id(&self) -> Option<i64> {
        self.try_borrow().and_then(|m| m.id())
    }

    /// `true` when both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Erase the concrete type.
    pub fn erase(&self) -> AnyModelRef {
        AnyModelRef {
            model_type: ModelType::of::<M>(),
            any: self.0.clone(),
            object: self.0.clone(),
        }
    }
}

impl<M> Clone for ModelRef<M> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<M: Model> PartialEq for ModelRef<M> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<M: Model> fmt::Debug for ModelRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRef")
            .field("model", &ModelType::of::<M>().name())
            .field("id", &self.id())
            .finish()
    }
}

/// Shared handle to a model instance of erased type.
#[derive(Clone)]
pub struct AnyModelRef {
    model_type: ModelType,
    any: Rc<dyn Any>,
    object: Rc<RefCell<dyn AnyModel>>,
}

impl AnyModelRef {
    pub fn new<M: Model>(model: M) -> Self {
        ModelRef::new(model).erase()
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// Recover the typed handle. Returns `None` on a type mismatch.
    pub fn downcast<M: Model>(&self) -> Option<ModelRef<M>> {
        Rc::downcast::<RefCell<M>>(Rc::clone(&self.any))
            .ok()
            .map(ModelRef)
    }

    /// Like [`downcast`](Self::downcast), reporting a mismatch as an error.
    pub fn downcast_or_err<M: Model>(&self) -> Result<ModelRef<M>> {
        self.downcast().ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<M>(),
                actual: self.model_type.name().to_string(),
                column: None,
            })
        })
    }

    /// Immutably borrow the model.
    ///
    /// # Panics
    ///
    /// Panics if the model is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, dyn AnyModel> {
        self.object.borrow()
    }

    /// Mutably borrow the model.
    ///
    /// # Panics
    ///
    /// Panics if the model is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, dyn AnyModel> {
        self.object.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, dyn AnyModel>> {
        self.object.try_borrow_mut().ok()
    }

    /// Primary key, or `None` if transient or currently mutably borrowed.
    pub fn id(&self) -> Option<i64> {
        self.object.try_borrow().ok().and_then(|m| m.id())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.any), Rc::as_ptr(&other.any))
    }
}

impl<M: Model> From<ModelRef<M>> for AnyModelRef {
    fn from(model: ModelRef<M>) -> Self {
        model.erase()
    }
}

impl fmt::Debug for AnyModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyModelRef")
            .field("model", &self.model_type.name())
            .field("id", &self.id())
            .finish()
    }
}

/// Lookup surface handed to relation factories and factory methods.
///
/// Implemented by the session; lookups go through the instance registry so
/// identity is preserved.
pub trait Resolve {
    /// Fetch one instance by primary key.
    fn find(&self, model: ModelType, id: i64) -> Result<AnyModelRef>;

    /// Fetch every instance whose `column` equals `value`, keyed by id.
    fn find_where(
        &self,
        model: ModelType,
        column: &str,
        value: Value,
    ) -> Result<Vec<(i64, AnyModelRef)>>;
}

impl dyn Resolve + '_ {
    /// Typed [`find`](Resolve::find).
    pub fn get<M: Model>(&self, id: i64) -> Result<ModelRef<M>> {
        self.find(ModelType::of::<M>(), id)?.downcast_or_err()
    }

    /// Typed [`find_where`](Resolve::find_where), collected.
    pub fn all_where<M: Model>(
        &self,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<ModelCollection<M>> {
        let mut collection = ModelCollection::new();
        for (id, any) in self.find_where(ModelType::of::<M>(), column, value.into())? {
            collection.insert_keyed(id, any.downcast_or_err()?);
        }
        Ok(collection)
    }
}

/// Return types accepted from lifecycle hook methods.
pub trait HookResult {
    fn into_hook_result(self) -> Result<()>;
}

impl HookResult for () {
    fn into_hook_result(self) -> Result<()> {
        Ok(())
    }
}

impl HookResult for Result<()> {
    fn into_hook_result(self) -> Result<()> {
        self
    }
}

/// Return types accepted from relation factory methods.
pub trait IntoRelationValue {
    fn into_relation_value(self) -> Result<RelationValue>;
}

impl<M: Model> IntoRelationValue for ModelRef<M> {
    fn into_relation_value(self) -> Result<RelationValue> {
        Ok(RelationValue::One(Some(self.erase())))
    }
}

impl<M: Model> IntoRelationValue for Option<ModelRef<M>> {
    fn into_relation_value(self) -> Result<RelationValue> {
        Ok(RelationValue::One(self.map(|m| m.erase())))
    }
}

impl<M: Model> IntoRelationValue for ModelCollection<M> {
    fn into_relation_value(self) -> Result<RelationValue> {
        Ok(RelationValue::Many(
            self.entries()
                .iter()
                .map(|(id, m)| (*id, m.erase()))
                .collect(),
        ))
    }
}

impl<V: IntoRelationValue> IntoRelationValue for Result<V> {
    fn into_relation_value(self) -> Result<RelationValue> {
        self.and_then(IntoRelationValue::into_relation_value)
    }
}
