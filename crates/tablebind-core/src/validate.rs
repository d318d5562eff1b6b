//! Field validation run before a model is saved.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationErrorKind};
use crate::value::Value;

const NUMERIC_PATTERN: &str = r"^\s*[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?\s*$";

/// A validation rule attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "arg", rename_all = "snake_case")]
pub enum Validation {
    /// Non-empty and numeric (a number, or text that parses as one)
    Numeric,
    /// Text matching a regular expression
    Pattern(String),
}

impl Validation {
    /// Check `value`, recording a failure in `errors`.
    pub fn check(&self, model: &str, field: &str, value: &Value, errors: &mut ValidationError) {
        match self {
            Validation::Numeric => {
                if is_empty(value) {
                    errors.add(
                        model,
                        field,
                        ValidationErrorKind::Required,
                        "should not be empty",
                    );
                } else if !is_numeric(value) {
                    errors.add_with_value(
                        model,
                        field,
                        ValidationErrorKind::Numeric,
                        "should be numeric",
                        display(value),
                    );
                }
            }
            Validation::Pattern(pattern) => {
                let text = crate::coerce::to_text(value).unwrap_or_default();
                if !matches_pattern(&text, pattern) {
                    errors.add_with_value(
                        model,
                        field,
                        ValidationErrorKind::Custom,
                        &format!("should match {pattern}"),
                        text,
                    );
                }
            }
        }
    }
}

/// Null, zero, false and empty or `"0"` text all count as empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Int(i) => *i == 0,
        Value::BigInt(i) => *i == 0,
        Value::Double(d) => *d == 0.0,
        Value::Text(s) => s.is_empty() || s == "0",
        Value::Bytes(b) => b.is_empty(),
        Value::Json(j) => j.is_null(),
        Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::Interval(_) => false,
    }
}

pub fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Int(_) | Value::BigInt(_) => true,
        Value::Double(d) => d.is_finite(),
        Value::Text(s) => matches_pattern(s, NUMERIC_PATTERN),
        _ => false,
    }
}

fn display(value: &Value) -> String {
    crate::coerce::to_text(value).unwrap_or_else(|| value.type_name().to_string())
}

struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }
        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(|| RegexCache {
        cache: RwLock::new(HashMap::new()),
    })
}

/// Check a string against a pattern. Invalid patterns never match.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(rule: &Validation, value: Value) -> ValidationError {
        let mut errors = ValidationError::new();
        rule.check("ModelA", "age", &value, &mut errors);
        errors
    }

    #[test]
    fn numeric_accepts_numbers_and_numeric_text() {
        assert!(check(&Validation::Numeric, Value::BigInt(10)).is_empty());
        assert!(check(&Validation::Numeric, Value::Text(" 1.5e3 ".into())).is_empty());
        assert!(check(&Validation::Numeric, Value::Double(0.25)).is_empty());
    }

    #[test]
    fn numeric_rejects_empty_values() {
        let empties = [
            Value::Null,
            Value::BigInt(0),
            Value::Text("0".into()),
            Value::Text(String::new()),
        ];
        for empty in empties {
            let errors = check(&Validation::Numeric, empty);
            assert_eq!(errors.errors.len(), 1);
            assert_eq!(errors.errors[0].kind, ValidationErrorKind::Required);
        }
    }

    #[test]
    fn numeric_rejects_words() {
        let errors = check(&Validation::Numeric, Value::Text("ten".into()));
        assert_eq!(errors.errors[0].kind, ValidationErrorKind::Numeric);
        assert!(errors.errors[0].message.contains("ten"));
    }

    #[test]
    fn pattern_rule() {
        let rule = Validation::Pattern("^[a-z]+$".into());
        assert!(check(&rule, Value::Text("abc".into())).is_empty());
        assert!(!check(&rule, Value::Text("ABC".into())).is_empty());
        assert!(!matches_pattern("x", "("));
    }
}
