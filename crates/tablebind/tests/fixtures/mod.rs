//! Models and schema shared by the SQLite integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use tablebind::prelude::*;
use tablebind::{AnyModelRef, Connection, ModelFactory};

pub const SCHEMA: &str = "
    CREATE TABLE modelsA (
        model_a_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        age INTEGER NOT NULL DEFAULT 0,
        verified INTEGER NOT NULL DEFAULT 0,
        born TEXT,
        status TEXT NOT NULL DEFAULT 'draft'
    );
    CREATE TABLE modelsB (
        model_b_id INTEGER PRIMARY KEY,
        description TEXT NOT NULL,
        model_a_id INTEGER REFERENCES modelsA (model_a_id)
    );
    CREATE TABLE modelsC (
        model_c_id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        model_a_id INTEGER
    );
    CREATE TABLE modelsD (model_d_id INTEGER PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE modelsE (model_e_id INTEGER PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE modelsD_modelsE (
        model_d_id INTEGER NOT NULL,
        model_e_id INTEGER NOT NULL,
        PRIMARY KEY (model_d_id, model_e_id)
    );
    CREATE TABLE measurements (measurement_id INTEGER PRIMARY KEY, reading TEXT NOT NULL);
    CREATE TABLE widgets (widget_id INTEGER PRIMARY KEY, label TEXT NOT NULL);
    CREATE TABLE gadgets (gadget_id INTEGER PRIMARY KEY, widget_id INTEGER NOT NULL);
    CREATE TABLE stamped (
        stamped_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT,
        updated_at TEXT
    );
";

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BackedEnum)]
pub enum Status {
    #[default]
    #[orm(value = "draft")]
    Draft,
    #[orm(value = "active")]
    Active,
}

#[derive(Debug, Default, Model)]
#[orm(
    table = "modelsA",
    before_insert = "log_before_insert",
    after_insert = "log_after_insert",
    before_update = "log_before_update",
    after_update = "log_after_update",
    before_delete = "log_before_delete",
    after_delete = "log_after_delete"
)]
pub struct ModelA {
    pub state: ModelState,
    pub model_a_id: Option<i64>,
    pub name: String,
    pub age: i32,
    pub verified: bool,
    pub born: Option<NaiveDate>,
    pub status: Status,
    #[orm(one_to_many)]
    pub children: RelatedMany<ModelB>,
    #[orm(skip)]
    pub hook_log: Vec<&'static str>,
}

impl ModelA {
    fn log_before_insert(&mut self) {
        self.hook_log.push("before_insert");
    }

    fn log_after_insert(&mut self) {
        self.hook_log.push("after_insert");
    }

    fn log_before_update(&mut self) {
        self.hook_log.push("before_update");
    }

    fn log_after_update(&mut self) {
        self.hook_log.push("after_update");
    }

    fn log_before_delete(&mut self) {
        self.hook_log.push("before_delete");
    }

    fn log_after_delete(&mut self) {
        self.hook_log.push("after_delete");
    }
}

thread_local! {
    static REPARENTED: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

/// Ids `ModelB::reparented` was called with on this thread, drained.
pub fn take_reparented() -> Vec<i64> {
    let mut ids = REPARENTED.with(|ids| std::mem::take(&mut *ids.borrow_mut()));
    ids.sort_unstable();
    ids
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsB", after_external_update = "reparented")]
pub struct ModelB {
    pub state: ModelState,
    pub model_b_id: Option<i64>,
    pub description: String,
    #[orm(many_to_one(eager))]
    pub parent: Related<ModelA>,
}

impl ModelB {
    fn reparented(id: i64) {
        REPARENTED.with(|ids| ids.borrow_mut().push(id));
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsC")]
pub struct ModelC {
    pub state: ModelState,
    pub model_c_id: Option<i64>,
    pub title: String,
    #[orm(many_to_one)]
    pub owner: Related<ModelA>,
    #[orm(one_to_many(factory_method = "load_siblings"))]
    pub siblings: RelatedMany<ModelC>,
}

impl ModelC {
    /// Other rows sharing this row's owner.
    fn load_siblings(&self, db: &dyn Resolve) -> Result<ModelCollection<ModelC>> {
        let owner = self.state.row().and_then(|row| row.get_by_name("model_a_id"));
        let Some(owner) = owner.cloned() else {
            return Ok(ModelCollection::new());
        };
        let own_id = self.model_c_id;
        Ok(db
            .all_where::<ModelC>("model_a_id", owner)?
            .filter(|c| c.model_c_id != own_id))
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsD")]
pub struct ModelD {
    pub state: ModelState,
    pub model_d_id: Option<i64>,
    pub label: String,
    #[orm(many_to_many(through = "modelsD_modelsE"))]
    pub members: RelatedMany<ModelE>,
}

thread_local! {
    static EXTERNAL_UPDATES: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

/// Ids `ModelE::links_changed` was called with on this thread, drained.
pub fn take_external_updates() -> Vec<i64> {
    EXTERNAL_UPDATES.with(|ids| std::mem::take(&mut *ids.borrow_mut()))
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsE", after_external_update = "links_changed")]
pub struct ModelE {
    pub state: ModelState,
    pub model_e_id: Option<i64>,
    pub label: String,
    #[orm(many_to_many)]
    pub groups: RelatedMany<ModelD>,
}

impl ModelE {
    fn links_changed(id: i64) {
        EXTERNAL_UPDATES.with(|ids| ids.borrow_mut().push(id));
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "measurements")]
pub struct Measurement {
    pub state: ModelState,
    pub measurement_id: Option<i64>,
    #[orm(numeric)]
    pub reading: String,
}

#[derive(Debug, Default, Model)]
#[orm(table = "widgets", factory = "widgets", factory_options = r#"{"prefix": "w-"}"#)]
pub struct Widget {
    pub state: ModelState,
    pub widget_id: Option<i64>,
    pub label: String,
}

#[derive(Debug, Default, Model)]
#[orm(table = "gadgets")]
pub struct Gadget {
    pub state: ModelState,
    pub gadget_id: Option<i64>,
    #[orm(many_to_one(eager))]
    pub widget: Related<Widget>,
}

#[derive(Debug, Default, Model)]
#[orm(table = "stamped", before_insert = "stamp_created", before_update = "stamp_updated")]
pub struct Stamped {
    pub state: ModelState,
    pub stamped_id: Option<i64>,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CreatedAt for Stamped {
    fn created_at_mut(&mut self) -> &mut Option<DateTime<Utc>> {
        &mut self.created_at
    }
}

impl UpdatedAt for Stamped {
    fn updated_at_mut(&mut self) -> &mut Option<DateTime<Utc>> {
        &mut self.updated_at
    }
}

// ============================================================================
// Factories
// ============================================================================

thread_local! {
    static FACTORY_CALLS: Cell<usize> = const { Cell::new(0) };
}

pub fn factory_calls() -> usize {
    FACTORY_CALLS.with(Cell::get)
}

/// Builds widgets without touching the database.
pub struct WidgetFactory;

impl WidgetFactory {
    fn build(id: i64, options: &FactoryOptions) -> AnyModelRef {
        FACTORY_CALLS.with(|calls| calls.set(calls.get() + 1));
        let prefix = options.get("prefix").and_then(|v| v.as_str()).unwrap_or_default();
        let mut widget = Widget {
            widget_id: Some(id),
            label: format!("{prefix}{id}"),
            ..Widget::default()
        };
        widget.state.set_id(Some(id));
        AnyModelRef::new(widget)
    }
}

impl ModelFactory for WidgetFactory {
    fn get_by_id(
        &self,
        _db: &dyn Resolve,
        _model: ModelType,
        id: i64,
        options: &FactoryOptions,
    ) -> Result<AnyModelRef> {
        Ok(Self::build(id, options))
    }

    fn get_all(
        &self,
        _db: &dyn Resolve,
        _model: ModelType,
        options: &FactoryOptions,
    ) -> Result<Vec<(i64, AnyModelRef)>> {
        Ok((1..=3).map(|id| (id, Self::build(id, options))).collect())
    }
}

// ============================================================================
// Connections
// ============================================================================

/// A SQLite connection that records every statement it runs.
#[derive(Clone)]
pub struct Recording {
    inner: Rc<SqliteConnection>,
    log: Rc<RefCell<Vec<String>>>,
}

impl Recording {
    pub fn new(conn: SqliteConnection) -> Self {
        Self {
            inner: Rc::new(conn),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Every statement so far.
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    /// Statements starting with `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.log.borrow().iter().filter(|sql| sql.starts_with(verb)).count()
    }

    fn record(&self, sql: &str) {
        self.log.borrow_mut().push(sql.to_string());
    }
}

impl Connection for Recording {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql);
        self.inner.execute(sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.record(sql);
        self.inner.insert(sql, params)
    }

    fn last_insert_id(&self) -> Result<i64> {
        self.inner.last_insert_id()
    }

    fn begin(&self) -> Result<()> {
        self.record("BEGIN");
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.record("COMMIT");
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK");
        self.inner.rollback()
    }
}

/// A fresh in-memory database with the test schema.
pub fn database() -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    conn
}

/// A session over a recorded in-memory database.
pub fn session() -> (Session, Recording) {
    let conn = Recording::new(database());
    (Session::new(conn.clone()), conn)
}

/// Run seed SQL on the session's connection.
pub fn seed(session: &Session, sql: &[&str]) {
    for statement in sql {
        session.connection().execute(statement, &[]).expect("seed statement");
    }
}

/// Insert a `ModelA` row through the session and return its id.
pub fn new_a(session: &Session, name: &str) -> ModelRef<ModelA> {
    let a = session
        .create(ModelA {
            name: name.to_string(),
            ..ModelA::default()
        })
        .expect("create ModelA");
    assert!(session.save(&a).expect("save ModelA"));
    a
}

/// A fresh directory path under the system temp dir; not created.
pub fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tablebind_it_{name}_{}_{n}", std::process::id()))
}
