//! Session layer for tablebind.
//!
//! `tablebind-session` is the **runtime engine**. A [`Session`] owns a
//! connection and coordinates everything that happens between a model type
//! and its table:
//!
//! - **Metadata**: resolves each type's declaration into a validated
//!   `ModelConfig`, optionally persisted as a JSON artifact.
//! - **Identity map**: at most one live instance per `(type, id)`.
//! - **Hydration and relations**: rows become instances; relations are
//!   loaded eagerly or on first [`load`](Session::load).
//! - **Change tracking and persistence**: `save` writes only what changed and
//!   reconciles one-to-many and many-to-many collections.
//! - **Queries and serialization**: [`ModelQuery`] for filtered reads,
//!   [`Session::to_json`] for output.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(SqliteConnection::open_memory()?);
//!
//! let a = session.get::<ModelA>(1)?;
//! a.borrow_mut().name = "renamed".into();
//! session.save(&a)?;
//!
//! let children = session.related_many::<ModelA, ModelB>(&a, "children")?;
//! ```
//!
//! Sessions are single-threaded: models are shared through `Rc<RefCell<_>>`
//! handles and every operation takes `&self`.

pub mod change_tracker;
mod hydrate;
pub mod identity_map;
pub mod metadata;
pub mod persist;
pub mod query;
pub mod serialize;

#[cfg(test)]
mod testing;

pub use change_tracker::FieldState;
pub use identity_map::InstanceRegistry;
pub use metadata::MetadataCache;
pub use persist::LinkOp;
pub use query::ModelQuery;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

use tablebind_core::{
    AnyModel, AnyModelRef, Connection, Dialect, Error, Model, ModelCollection, ModelConfig,
    ModelFactory, ModelRef, ModelType, RelationValue, Resolve, Result, Row, TypeError, Value,
};
use tablebind_query::{Condition, QueryCache, Select, cache_key};

use crate::hydrate::{instantiate_fields, relation_slot};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory for resolved metadata artifacts. `None` keeps metadata in
    /// memory only.
    pub metadata_dir: Option<PathBuf>,
    /// Serve repeated reads from a tag-invalidated result cache.
    pub cache_results: bool,
    /// Maximum number of cached result sets.
    pub cache_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            metadata_dir: None,
            cache_results: false,
            cache_size: 1024,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn cache_results(mut self, enabled: bool) -> Self {
        self.cache_results = enabled;
        self
    }

    #[must_use]
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// A database session: one connection plus the instance registry, metadata
/// cache, factories and optional result cache built around it.
pub struct Session {
    pub(crate) conn: Box<dyn Connection>,
    pub(crate) config: SessionConfig,
    pub(crate) metadata: MetadataCache,
    pub(crate) registry: RefCell<InstanceRegistry>,
    pub(crate) factories: RefCell<HashMap<String, Rc<dyn ModelFactory>>>,
    pub(crate) cache: Option<RefCell<QueryCache>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.conn.dialect())
            .field("config", &self.config)
            .field("instances", &self.registry.borrow().len())
            .field("factories", &self.factories.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with the default configuration.
    pub fn new(conn: impl Connection + 'static) -> Self {
        Self::with_config(conn, SessionConfig::default())
    }

    pub fn with_config(conn: impl Connection + 'static, config: SessionConfig) -> Self {
        tracing::debug!(
            metadata_dir = ?config.metadata_dir,
            cache_results = config.cache_results,
            "Opening session"
        );
        Self {
            conn: Box::new(conn),
            metadata: MetadataCache::new(config.metadata_dir.clone()),
            registry: RefCell::new(InstanceRegistry::new()),
            factories: RefCell::new(HashMap::new()),
            cache: config
                .cache_results
                .then(|| RefCell::new(QueryCache::new(config.cache_size))),
            config,
        }
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Resolved configuration of a model type.
    pub fn config_of(&self, model: ModelType) -> Result<Rc<ModelConfig>> {
        self.metadata.resolve(model)
    }

    pub fn metadata<M: Model>(&self) -> Result<Rc<ModelConfig>> {
        self.config_of(ModelType::of::<M>())
    }

    /// Drop resolved metadata, including artifacts on disk.
    pub fn clear_metadata(&self) -> Result<()> {
        self.metadata.clear()
    }

    // ------------------------------------------------------------------------
    // Factories and the instance registry
    // ------------------------------------------------------------------------

    /// Register a factory under the name model types bind to.
    pub fn register_factory(&self, name: impl Into<String>, factory: impl ModelFactory + 'static) {
        let name = name.into();
        tracing::debug!(factory = %name, "Registering model factory");
        self.factories.borrow_mut().insert(name, Rc::new(factory));
    }

    /// Whether an instance of `M` with `id` is currently registered.
    pub fn is_registered<M: Model>(&self, id: i64) -> bool {
        self.registry.borrow().contains(ModelType::of::<M>(), id)
    }

    /// Forget registered instances of one type, or of all types.
    pub fn clear_instances(&self, model: Option<ModelType>) {
        self.registry.borrow_mut().clear(model);
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// The instance of `M` with primary key `id`.
    ///
    /// Returns the registered instance when there is one; otherwise selects
    /// and hydrates it. Fails with a not-found error when no row exists.
    pub fn get<M: Model>(&self, id: i64) -> Result<ModelRef<M>> {
        self.find(ModelType::of::<M>(), id)?.downcast_or_err()
    }

    /// Whether a row of `M` with primary key `id` exists.
    pub fn exists<M: Model>(&self, id: i64) -> Result<bool> {
        let config = self.metadata::<M>()?;
        self.query::<M>().where_eq(&config.primary_key, id).exists()
    }

    /// Wrap a new, unsaved instance, default-constructing its `instantiate`
    /// fields and empty collections.
    pub fn create<M: Model>(&self, model: M) -> Result<ModelRef<M>> {
        let config = self.metadata::<M>()?;
        let model = ModelRef::new(model);
        instantiate_fields(&model.erase(), &config)?;
        Ok(model)
    }

    /// Every instance of `M`, through the type's factory when it has one.
    pub fn get_all<M: Model>(&self) -> Result<ModelCollection<M>> {
        let model = ModelType::of::<M>();
        let config = self.config_of(model)?;
        let Some(binding) = &config.factory else {
            return self.query::<M>().get();
        };
        let factory = self.factories.borrow().get(&binding.factory).cloned();
        let factory = factory.ok_or_else(|| {
            Error::config(
                tablebind_core::ConfigErrorKind::MissingFactory,
                &config.model,
                None,
                format!("factory '{}' is not registered", binding.factory),
            )
        })?;
        let mut collection = ModelCollection::new();
        for (id, instance) in factory.get_all(self, model, &binding.options)? {
            collection.insert_keyed(id, instance.downcast_or_err()?);
        }
        Ok(collection)
    }

    /// Start a query over `M`'s table.
    pub fn query<M: Model>(&self) -> ModelQuery<'_, M> {
        ModelQuery::new(self)
    }

    /// Re-read `model` from its row.
    ///
    /// With `refresh`, or when the instance holds no row yet, the row is
    /// selected again; otherwise the stored row is reused. Relations are
    /// rebound, so loaded relations load again on next access.
    pub fn fetch<M: Model>(&self, model: &ModelRef<M>, refresh: bool) -> Result<()> {
        let config = self.metadata::<M>()?;
        let (id, stored) = {
            let m = model.borrow();
            (m.id(), m.state().row().cloned())
        };
        let Some(id) = id.filter(|id| *id > 0) else {
            return Err(Error::Custom(format!(
                "{} needs an id before it can be fetched",
                config.model
            )));
        };
        let row = match stored {
            Some(row) if !refresh => row,
            _ => self
                .fetch_row(&config, id, refresh)?
                .ok_or_else(|| Error::not_found(&config.model, &config.table, Some(id)))?,
        };
        self.hydrate(&model.erase(), &config, row)
    }

    // ------------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------------

    /// Load `field` of `model` if it is still pending.
    pub fn load<M: Model>(&self, model: &ModelRef<M>, field: &str) -> Result<()> {
        self.load_field(&model.erase(), field)
    }

    /// The model held by a to-one relation, loading it first.
    pub fn related<M: Model, T: Model>(
        &self,
        model: &ModelRef<M>,
        field: &str,
    ) -> Result<Option<ModelRef<T>>> {
        match self.relation_value(model, field)? {
            RelationValue::One(Some(instance)) => instance.downcast_or_err().map(Some),
            RelationValue::One(None) => Ok(None),
            RelationValue::Many(_) => Err(relation_shape_error("single model", field)),
        }
    }

    /// The models held by a to-many relation, loading them first.
    pub fn related_many<M: Model, T: Model>(
        &self,
        model: &ModelRef<M>,
        field: &str,
    ) -> Result<ModelCollection<T>> {
        match self.relation_value(model, field)? {
            RelationValue::Many(entries) => {
                let mut collection = ModelCollection::new();
                for (id, instance) in entries {
                    collection.insert_keyed(id, instance.downcast_or_err()?);
                }
                Ok(collection)
            }
            RelationValue::One(_) => Err(relation_shape_error("model collection", field)),
        }
    }

    fn relation_value<M: Model>(&self, model: &ModelRef<M>, field: &str) -> Result<RelationValue> {
        self.load(model, field)?;
        let m = model.borrow();
        relation_slot(&*m, field)?
            .value()
            .ok_or_else(|| Error::Custom(format!("relation '{field}' is not loaded")))
    }

    // ------------------------------------------------------------------------
    // Change tracking
    // ------------------------------------------------------------------------

    /// Whether `field` differs from its last loaded or saved value.
    pub fn has_changed<M: Model>(&self, model: &ModelRef<M>, field: &str) -> Result<bool> {
        let config = self.metadata::<M>()?;
        let property = config.require_property(field)?;
        change_tracker::has_changed(&*model.borrow(), &config, property)
    }

    /// Fields that differ from their last loaded or saved value.
    pub fn changed_properties<M: Model>(
        &self,
        model: &ModelRef<M>,
    ) -> Result<BTreeMap<String, FieldState>> {
        let config = self.metadata::<M>()?;
        change_tracker::changed_properties(&*model.borrow(), &config)
    }

    // ------------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------------

    /// Tags of a model query: `models`, the table, `<table>/query`, the
    /// type's own tags and any extra ones.
    pub(crate) fn query_tags(config: &ModelConfig, extra: Vec<String>) -> Vec<String> {
        let mut tags = vec![
            "models".to_string(),
            config.table.clone(),
            format!("{}/query", config.table),
        ];
        tags.extend(config.cache_tags.iter().cloned());
        tags.extend(extra);
        tags
    }

    /// Tags of a single-instance read.
    pub(crate) fn instance_tags(config: &ModelConfig, id: i64) -> Vec<String> {
        let mut tags = vec![
            "models".to_string(),
            config.table.clone(),
            format!("{}/{}", config.table, id),
        ];
        tags.extend(config.cache_tags.iter().cloned());
        tags
    }

    /// Run a SELECT, serving it from the result cache when enabled.
    pub(crate) fn select_rows(&self, select: &Select, tags: Vec<String>) -> Result<Vec<Row>> {
        let (sql, params) = select.build(self.dialect());
        self.cached_query(&sql, &params, tags)
    }

    /// Run raw SELECT SQL through the result cache when enabled.
    pub(crate) fn cached_query(
        &self,
        sql: &str,
        params: &[Value],
        tags: Vec<String>,
    ) -> Result<Vec<Row>> {
        let Some(cache) = &self.cache else {
            tracing::trace!(sql = %sql, "Executing query");
            return self.conn.query(sql, params);
        };
        let key = cache_key(sql, params);
        if let Some(rows) = cache.borrow_mut().get(key) {
            return Ok(rows);
        }
        tracing::trace!(sql = %sql, "Executing query");
        let rows = self.conn.query(sql, params)?;
        cache.borrow_mut().insert(key, rows.clone(), tags);
        Ok(rows)
    }

    pub(crate) fn select_uncached(&self, select: &Select) -> Result<Vec<Row>> {
        let (sql, params) = select.build(self.dialect());
        tracing::trace!(sql = %sql, "Executing query");
        self.conn.query(&sql, &params)
    }

    /// Drop cached results carrying any of `tags`.
    pub(crate) fn invalidate(&self, tags: &[String]) {
        if let Some(cache) = &self.cache {
            cache.borrow_mut().invalidate(tags);
        }
    }
}

fn relation_shape_error(expected: &'static str, field: &str) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("relation '{field}' of another shape"),
        column: None,
    })
}

impl Resolve for Session {
    fn find(&self, model: ModelType, id: i64) -> Result<AnyModelRef> {
        self.materialize(model, id, None)
    }

    fn find_where(
        &self,
        model: ModelType,
        column: &str,
        value: Value,
    ) -> Result<Vec<(i64, AnyModelRef)>> {
        let config = self.config_of(model)?;
        self.select_instances(
            model,
            &config,
            Select::from(&config.table).filter(Condition::eq(column, value)),
            Vec::new(),
        )
    }
}
