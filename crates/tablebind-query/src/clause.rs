//! SQL clause types (WHERE conditions, JOIN, ORDER BY).

use tablebind_core::{Dialect, Value};

/// A WHERE condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = ?`
    Eq(String, Value),
    /// `column <> ?`
    NotEq(String, Value),
    /// `column IN (?, ...)`; an empty list never matches
    In(String, Vec<Value>),
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// Raw SQL with `?` markers, renumbered for the dialect
    Raw(String, Vec<Value>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::NotEq(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Condition::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Condition::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Condition::IsNotNull(column.into())
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Raw(sql.into(), params)
    }

    /// Combine with another condition using AND.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Combine with another condition using OR.
    #[must_use]
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut parts) => {
                parts.push(other);
                Condition::Or(parts)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    /// Render the condition, appending its parameters to `params`.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Eq(column, value) => {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    bind(dialect, params, value.clone())
                )
            }
            Condition::NotEq(column, value) => {
                format!(
                    "{} <> {}",
                    dialect.quote_identifier(column),
                    bind(dialect, params, value.clone())
                )
            }
            Condition::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Condition::In(column, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| bind(dialect, params, v.clone()))
                    .collect();
                format!(
                    "{} IN ({})",
                    dialect.quote_identifier(column),
                    placeholders.join(", ")
                )
            }
            Condition::IsNull(column) => format!("{} IS NULL", dialect.quote_identifier(column)),
            Condition::IsNotNull(column) => {
                format!("{} IS NOT NULL", dialect.quote_identifier(column))
            }
            Condition::Raw(sql, values) => {
                let mut out = String::with_capacity(sql.len());
                let mut values = values.iter();
                for c in sql.chars() {
                    match (c, values.len()) {
                        ('?', n) if n > 0 => {
                            let value = values.next().cloned().unwrap_or(Value::Null);
                            out.push_str(&bind(dialect, params, value));
                        }
                        _ => out.push(c),
                    }
                }
                out
            }
            Condition::And(parts) => join(dialect, params, parts, " AND "),
            Condition::Or(parts) => join(dialect, params, parts, " OR "),
        }
    }
}

fn bind(dialect: Dialect, params: &mut Vec<Value>, value: Value) -> String {
    params.push(value);
    dialect.placeholder(params.len())
}

fn join(dialect: Dialect, params: &mut Vec<Value>, parts: &[Condition], sep: &str) -> String {
    if parts.is_empty() {
        return "1 = 1".to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", p.build(dialect, params)))
        .collect();
    rendered.join(sep)
}

/// Join type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// A JOIN against another table with a raw ON expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: String,
}

impl Join {
    pub fn inner(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            on: on.into(),
        }
    }

    pub fn left(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            on: on.into(),
        }
    }

    pub fn build(&self, dialect: Dialect) -> String {
        let kind = match self.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        format!("{} {} ON {}", kind, dialect.quote_identifier(&self.table), self.on)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    column: String,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    pub fn build(&self, dialect: Dialect) -> String {
        let dir = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        format!("{} {}", dialect.quote_identifier(&self.column), dir)
    }
}
