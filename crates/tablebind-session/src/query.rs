//! Fluent reads over one model's table.

use std::marker::PhantomData;

use tablebind_core::{Model, ModelCollection, ModelRef, ModelType, Result, Value};
use tablebind_query::{Condition, Join, OrderBy, OrderDirection, Select};

use crate::Session;

/// A query scoped to `M`'s table.
///
/// Results are hydrated through the session, so rows that already have a
/// registered instance resolve to it.
///
/// ```ignore
/// let recent = session
///     .query::<ModelB>()
///     .where_eq("model_a_id", 1)
///     .order_by("model_b_id")
///     .desc()
///     .limit(10)
///     .get()?;
/// ```
#[derive(Debug)]
pub struct ModelQuery<'s, M: Model> {
    session: &'s Session,
    conditions: Vec<Condition>,
    joins: Vec<Join>,
    orders: Vec<(String, OrderDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    tags: Vec<String>,
    _marker: PhantomData<M>,
}

impl<'s, M: Model> ModelQuery<'s, M> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            conditions: Vec::new(),
            joins: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            tags: Vec::new(),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::eq(column, value));
        self
    }

    #[must_use]
    pub fn where_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::is_in(column, values));
        self
    }

    #[must_use]
    pub fn where_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::is_null(column));
        self
    }

    #[must_use]
    pub fn where_not_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::is_not_null(column));
        self
    }

    /// Raw SQL condition; each `?` binds the next value.
    #[must_use]
    pub fn where_raw(mut self, sql: &str, params: Vec<Value>) -> Self {
        self.conditions.push(Condition::raw(sql, params));
        self
    }

    #[must_use]
    pub fn join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(Join::inner(table, on));
        self
    }

    #[must_use]
    pub fn left_join(mut self, table: &str, on: &str) -> Self {
        self.joins.push(Join::left(table, on));
        self
    }

    /// Sort ascending by `column`; follow with [`desc`](Self::desc) to flip.
    #[must_use]
    pub fn order_by(mut self, column: &str) -> Self {
        self.orders.push((column.to_string(), OrderDirection::Asc));
        self
    }

    #[must_use]
    pub fn asc(self) -> Self {
        self.direction(OrderDirection::Asc)
    }

    #[must_use]
    pub fn desc(self) -> Self {
        self.direction(OrderDirection::Desc)
    }

    fn direction(mut self, direction: OrderDirection) -> Self {
        if let Some(last) = self.orders.last_mut() {
            last.1 = direction;
        }
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Extra cache tags for this query's results.
    #[must_use]
    pub fn cache_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    fn select(&self) -> Select {
        let mut select = Select::from(M::TABLE);
        for join in &self.joins {
            select = select.join(join.clone());
        }
        for condition in &self.conditions {
            select = select.filter(condition.clone());
        }
        for (column, direction) in &self.orders {
            select = select.order_by(match direction {
                OrderDirection::Asc => OrderBy::asc(column),
                OrderDirection::Desc => OrderBy::desc(column),
            });
        }
        if let Some(n) = self.limit {
            select = select.limit(n);
        }
        if let Some(n) = self.offset {
            select = select.offset(n);
        }
        select
    }

    /// Number of matching rows.
    pub fn count(&self) -> Result<i64> {
        let config = self.session.metadata::<M>()?;
        let (sql, params) = self.select().build_count(self.session.dialect());
        let rows = self
            .session
            .cached_query(&sql, &params, Session::query_tags(&config, self.tags.clone()))?;
        Ok(rows
            .first()
            .and_then(|row| row.get_by_name("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.count()? > 0)
    }

    /// The first matching instance.
    pub fn first(&self) -> Result<Option<ModelRef<M>>> {
        let mut query = self.select();
        if self.limit.is_none() {
            query = query.limit(1);
        }
        Ok(self.run(query)?.first(|_| true))
    }

    /// All matching instances, keyed by primary key.
    pub fn get(&self) -> Result<ModelCollection<M>> {
        self.run(self.select())
    }

    fn run(&self, select: Select) -> Result<ModelCollection<M>> {
        let model = ModelType::of::<M>();
        let config = self.session.config_of(model)?;
        let mut collection = ModelCollection::new();
        for (id, instance) in self
            .session
            .select_instances(model, &config, select, self.tags.clone())?
        {
            collection.insert_keyed(id, instance.downcast_or_err()?);
        }
        Ok(collection)
    }
}
