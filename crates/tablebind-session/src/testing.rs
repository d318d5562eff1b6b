//! Fixtures shared by the unit tests: a scripted connection and a small
//! model graph.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tablebind_core::{
    Connection, Error, Extend, ExtendType, ModelState, QueryData, QueryErrorKind, Related,
    RelatedMany, Result, Row, Value,
};
use tablebind_macros::Model;

#[derive(Debug, Default)]
struct MockState {
    results: VecDeque<Vec<Row>>,
    queries: Vec<(String, Vec<Value>)>,
    statements: Vec<(String, Vec<Value>)>,
    next_id: i64,
    fail_writes: bool,
    fail_matching: Option<String>,
}

/// Connection that replays queued result sets and records every statement.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Rc<RefCell<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        let conn = Self::default();
        conn.state.borrow_mut().next_id = 1;
        conn
    }

    /// Queue the result of the next `query` call.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state.borrow_mut().results.push_back(rows);
    }

    /// Id returned by the next insert; later inserts count up from it.
    pub fn set_insert_id(&self, id: i64) {
        self.state.borrow_mut().next_id = id;
    }

    /// Make every INSERT, UPDATE and DELETE fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    /// Make writes whose SQL contains `fragment` fail; `None` stops it.
    pub fn fail_matching(&self, fragment: Option<&str>) {
        self.state.borrow_mut().fail_matching = fragment.map(str::to_string);
    }

    /// SELECTs issued so far.
    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.borrow().queries.clone()
    }

    /// Writes and transaction statements issued so far.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.borrow().statements.clone()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.statements.push((sql.to_string(), params.to_vec()));
        let matched = state
            .fail_matching
            .as_deref()
            .is_some_and(|fragment| sql.contains(fragment));
        if state.fail_writes || matched {
            return Err(Error::query(QueryErrorKind::Constraint, Some(sql), "write rejected"));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut state = self.state.borrow_mut();
        state.queries.push((sql.to_string(), params.to_vec()));
        Ok(state.results.pop_front().unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.record(sql, params)?;
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(self.state.borrow().next_id - 1)
    }

    fn begin(&self) -> Result<()> {
        self.state.borrow_mut().statements.push(("BEGIN".into(), Vec::new()));
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.borrow_mut().statements.push(("COMMIT".into(), Vec::new()));
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.state.borrow_mut().statements.push(("ROLLBACK".into(), Vec::new()));
        Ok(())
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsA")]
pub struct ModelA {
    pub state: ModelState,
    pub model_a_id: Option<i64>,
    pub name: String,
    #[orm(one_to_many)]
    pub children: RelatedMany<ModelB>,
}

thread_local! {
    static REPARENTED: Cell<usize> = const { Cell::new(0) };
}

/// How often `ModelB::reparented` ran on this thread.
pub fn reparented() -> usize {
    REPARENTED.with(Cell::get)
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
    fn reparented(_id: i64) {
        REPARENTED.with(|count| count.set(count.get() + 1));
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsD")]
pub struct ModelD {
    pub state: ModelState,
    pub model_d_id: Option<i64>,
    #[orm(many_to_many(through = "modelsD_modelsE"))]
    pub members: RelatedMany<ModelE>,
}

thread_local! {
    static EXTERNAL_UPDATES: Cell<usize> = const { Cell::new(0) };
}

/// How often `ModelE::links_changed` ran on this thread.
pub fn external_updates() -> usize {
    EXTERNAL_UPDATES.with(Cell::get)
}

#[derive(Debug, Default, Model)]
#[orm(table = "modelsE", after_external_update = "links_changed")]
pub struct ModelE {
    pub state: ModelState,
    pub model_e_id: Option<i64>,
    #[orm(many_to_many)]
    pub groups: RelatedMany<ModelD>,
}

impl ModelE {
    fn links_changed(_id: i64) {
        EXTERNAL_UPDATES.with(|count| count.set(count.get() + 1));
    }
}

/// Two independent link tables to the same target.
#[derive(Debug, Default, Model)]
#[orm(table = "tagged")]
pub struct Tagged {
    pub state: ModelState,
    pub tagged_id: Option<i64>,
    #[orm(many_to_many(through = "tagged_primary"))]
    pub primary: RelatedMany<ModelE>,
    #[orm(many_to_many(through = "tagged_secondary"))]
    pub secondary: RelatedMany<ModelE>,
}

#[derive(Debug, Default, Model)]
#[orm(table = "links")]
pub struct Link {
    pub state: ModelState,
    pub id: Option<i64>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl ExtendType for Money {
    fn parse_row(row: &Row) -> Result<Self> {
        let amount = row.get_by_name("amount").and_then(Value::as_i64).unwrap_or(0);
        let currency = row
            .get_by_name("currency")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { amount, currency })
    }

    fn add_query_data(&self, data: &mut QueryData) {
        data.insert("amount".into(), Value::BigInt(self.amount));
        data.insert("currency".into(), Value::Text(self.currency.clone()));
    }
}

#[derive(Debug, Default, Model)]
#[orm(table = "priced")]
pub struct Priced {
    pub state: ModelState,
    pub priced_id: Option<i64>,
    pub price: Extend<Money>,
}

pub fn a_row(id: i64, name: &str) -> Row {
    Row::from_pairs([
        ("model_a_id", Value::BigInt(id)),
        ("name", Value::Text(name.to_string())),
    ])
}

pub fn b_row(id: i64, description: &str, parent: Option<i64>) -> Row {
    Row::from_pairs([
        ("model_b_id", Value::BigInt(id)),
        ("description", Value::Text(description.to_string())),
        ("model_a_id", parent.map_or(Value::Null, Value::BigInt)),
    ])
}

/// A fresh directory path under the system temp dir; not created.
pub fn temp_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tablebind_{name}_{}_{n}", std::process::id()))
}
