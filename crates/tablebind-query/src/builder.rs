//! Statement builders for SELECT, INSERT, UPDATE and DELETE.
//!
//! Each builder renders to `(sql, params)` for a given [`Dialect`]; the
//! session executes the result through its `Connection`.

use tablebind_core::{Dialect, QueryData, Value};

use crate::clause::{Condition, Join, OrderBy};

fn where_sql(filter: Option<&Condition>, dialect: Dialect, params: &mut Vec<Value>) -> String {
    match filter {
        Some(cond) => format!(" WHERE {}", cond.build(dialect, params)),
        None => String::new(),
    }
}

fn and_filter(existing: Option<Condition>, cond: Condition) -> Option<Condition> {
    Some(match existing {
        Some(prev) => prev.and(cond),
        None => cond,
    })
}

/// SELECT query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    joins: Vec<Join>,
    filter: Option<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Select all columns from a table.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Restrict the selected columns (default `*`).
    #[must_use]
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a WHERE condition (ANDed with existing ones).
    #[must_use]
    pub fn filter(mut self, cond: Condition) -> Self {
        self.filter = and_filter(self.filter.take(), cond);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
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

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let table = dialect.quote_identifier(&self.table);
        let columns = if self.columns.is_empty() && self.joins.is_empty() {
            "*".to_string()
        } else if self.columns.is_empty() {
            // joined columns must not shadow the model's own
            format!("{table}.*")
        } else {
            self.columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {table}");
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.build(dialect));
        }
        sql.push_str(&where_sql(self.filter.as_ref(), dialect, &mut params));
        if !self.order_by.is_empty() {
            let order: Vec<String> = self.order_by.iter().map(|o| o.build(dialect)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite and MySQL need a LIMIT before OFFSET
            (None, Some(offset)) => match dialect {
                Dialect::Postgres => sql.push_str(&format!(" OFFSET {offset}")),
                Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
                Dialect::Mysql => {
                    sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {offset}"));
                }
            },
            (None, None) => {}
        }
        (sql, params)
    }

    /// Render `SELECT COUNT(*)` over the same joins and filter. Ordering,
    /// limit and offset are ignored.
    pub fn build_count(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT COUNT(*) AS {} FROM {}",
            dialect.quote_identifier("count"),
            dialect.quote_identifier(&self.table)
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.build(dialect));
        }
        sql.push_str(&where_sql(self.filter.as_ref(), dialect, &mut params));
        (sql, params)
    }
}

/// INSERT query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    ignore_conflicts: bool,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Insert one row from column data.
    #[must_use]
    pub fn values(mut self, data: &QueryData) -> Self {
        self.columns = data.keys().cloned().collect();
        self.rows = vec![data.values().cloned().collect()];
        self
    }

    /// Insert rows for fixed columns.
    #[must_use]
    pub fn rows<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self.rows = rows;
        self
    }

    /// Skip rows that violate a unique constraint instead of failing.
    #[must_use]
    pub fn ignore_conflicts(mut self) -> Self {
        self.ignore_conflicts = true;
        self
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let verb = match (self.ignore_conflicts, dialect) {
            (true, Dialect::Sqlite) => "INSERT OR IGNORE INTO",
            (true, Dialect::Mysql) => "INSERT IGNORE INTO",
            _ => "INSERT INTO",
        };
        let table = dialect.quote_identifier(&self.table);
        let mut sql = if self.columns.is_empty() {
            match dialect {
                Dialect::Mysql => format!("{verb} {table} () VALUES ()"),
                Dialect::Sqlite | Dialect::Postgres => format!("{verb} {table} DEFAULT VALUES"),
            }
        } else {
            let columns: Vec<String> = self
                .columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            let rows: Vec<String> = self
                .rows
                .iter()
                .map(|row| {
                    let placeholders: Vec<String> = row
                        .iter()
                        .map(|v| {
                            params.push(v.clone());
                            dialect.placeholder(params.len())
                        })
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();
            format!(
                "{verb} {table} ({}) VALUES {}",
                columns.join(", "),
                rows.join(", ")
            )
        };
        if self.ignore_conflicts && dialect == Dialect::Postgres {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        (sql, params)
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    table: String,
    set: Vec<(String, Value)>,
    filter: Option<Condition>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    /// Set every column in `data`.
    #[must_use]
    pub fn set_all(mut self, data: &QueryData) -> Self {
        self.set
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn filter(mut self, cond: Condition) -> Self {
        self.filter = and_filter(self.filter.take(), cond);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .set
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.placeholder(params.len())
                )
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            assignments.join(", ")
        );
        sql.push_str(&where_sql(self.filter.as_ref(), dialect, &mut params));
        (sql, params)
    }
}

/// DELETE query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delete {
    table: String,
    filter: Option<Condition>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, cond: Condition) -> Self {
        self.filter = and_filter(self.filter.take(), cond);
        self
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));
        sql.push_str(&where_sql(self.filter.as_ref(), dialect, &mut params));
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_id() {
        let (sql, params) = Select::from("modelsA")
            .filter(Condition::eq("model_a_id", 3i64))
            .build(Dialect::Sqlite);
        assert_eq!(sql, "SELECT * FROM \"modelsA\" WHERE \"model_a_id\" = ?1");
        assert_eq!(params, vec![Value::BigInt(3)]);
    }

    #[test]
    fn test_select_columns_order_limit() {
        let (sql, _) = Select::from("t")
            .columns(["a", "b"])
            .order_by(OrderBy::asc("a"))
            .limit(10)
            .offset(5)
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"a\", \"b\" FROM \"t\" ORDER BY \"a\" ASC LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn test_count_ignores_order_and_limit() {
        let (sql, params) = Select::from("modelsA")
            .filter(Condition::eq("name", "x"))
            .order_by(OrderBy::desc("name"))
            .limit(1)
            .build_count(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS \"count\" FROM \"modelsA\" WHERE \"name\" = ?1"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_select_with_join_selects_own_columns() {
        let (sql, _) = Select::from("modelsA")
            .join(Join::inner("modelsB", "modelsB.model_a_id = modelsA.model_a_id"))
            .build(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"modelsA\".* FROM \"modelsA\" \
             INNER JOIN \"modelsB\" ON modelsB.model_a_id = modelsA.model_a_id"
        );
    }

    #[test]
    fn test_insert_values() {
        let mut data = QueryData::new();
        data.insert("name".into(), Value::Text("test".into()));
        data.insert("age".into(), Value::BigInt(10));
        let (sql, params) = Insert::into("modelsA").values(&data).build(Dialect::Sqlite);
        assert_eq!(sql, "INSERT INTO \"modelsA\" (\"age\", \"name\") VALUES (?1, ?2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_insert_default_values() {
        let (sql, _) = Insert::into("t").values(&QueryData::new()).build(Dialect::Sqlite);
        assert_eq!(sql, "INSERT INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn test_insert_ignore_per_dialect() {
        let insert = Insert::into("links")
            .rows(["a_id", "b_id"], vec![vec![Value::BigInt(1), Value::BigInt(2)]])
            .ignore_conflicts();
        assert!(insert.build(Dialect::Sqlite).0.starts_with("INSERT OR IGNORE INTO"));
        assert!(insert.build(Dialect::Mysql).0.starts_with("INSERT IGNORE INTO"));
        assert!(insert.build(Dialect::Postgres).0.ends_with("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn test_update_and_delete() {
        let (sql, params) = Update::table("t")
            .set("name", "x")
            .filter(Condition::eq("id", 1i64))
            .build(Dialect::Postgres);
        assert_eq!(sql, "UPDATE \"t\" SET \"name\" = $1 WHERE \"id\" = $2");
        assert_eq!(params.len(), 2);

        let (sql, _) = Delete::from("t")
            .filter(Condition::eq("a", 1i64))
            .filter(Condition::is_in("b", [2i64, 3]))
            .build(Dialect::Sqlite);
        assert_eq!(sql, "DELETE FROM \"t\" WHERE (\"a\" = ?1) AND (\"b\" IN (?2, ?3))");
    }
}
