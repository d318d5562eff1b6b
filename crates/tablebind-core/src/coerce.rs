//! Conversion of raw column values to a field's declared kind.
//!
//! Drivers return whatever their storage class is (SQLite hands back text for
//! dates, integers for booleans). [`coerce`] normalizes a raw value into the
//! canonical [`Value`] variant for the field before it is assigned, so that
//! change detection compares like with like.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{Error, Result, TypeError};
use crate::field::{FieldKind, ScalarKind, TemporalKind};
use crate::value::Value;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Coerce a raw column value to the canonical value for a field.
///
/// Rules:
/// - temporal kinds accept intervals (read as a time of day), epoch seconds
///   and text; NULL is only allowed when the field is nullable
/// - built-in scalars turn NULL into the zero value unless nullable, and
///   everything else into the declared scalar
/// - enums, extend types and relations pass through untouched
pub fn coerce(kind: FieldKind, nullable: bool, raw: Value) -> Result<Value> {
    match kind {
        FieldKind::Temporal(temporal) => {
            if raw.is_null() {
                if nullable {
                    Ok(Value::Null)
                } else {
                    Err(Error::Type(TypeError {
                        expected: temporal_name(temporal),
                        actual: "NULL in a non-nullable field".to_string(),
                        column: None,
                    }))
                }
            } else {
                to_temporal(temporal, &raw)
            }
        }
        FieldKind::Scalar(scalar) => {
            if raw.is_null() {
                Ok(if nullable { Value::Null } else { zero_value(scalar) })
            } else {
                to_scalar(scalar, raw)
            }
        }
        FieldKind::Enum | FieldKind::Extend | FieldKind::Model | FieldKind::Collection => Ok(raw),
    }
}

/// The value a non-nullable built-in takes when the column is NULL.
pub fn zero_value(kind: ScalarKind) -> Value {
    match kind {
        ScalarKind::Int => Value::BigInt(0),
        ScalarKind::Float => Value::Double(0.0),
        ScalarKind::Text => Value::Text(String::new()),
        ScalarKind::Bool => Value::Bool(false),
        ScalarKind::Bytes => Value::Bytes(Vec::new()),
        ScalarKind::Json => Value::Json(serde_json::Value::Null),
    }
}

fn to_scalar(kind: ScalarKind, raw: Value) -> Result<Value> {
    let converted = match kind {
        ScalarKind::Int => match &raw {
            Value::Double(d) => Some(Value::BigInt(d.trunc() as i64)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64))
                .map(Value::BigInt),
            other => other.as_i64().map(Value::BigInt),
        },
        ScalarKind::Float => match &raw {
            Value::Text(s) => s.trim().parse().ok().map(Value::Double),
            other => other.as_f64().map(Value::Double),
        },
        ScalarKind::Text => to_text(&raw).map(Value::Text),
        ScalarKind::Bool => match &raw {
            Value::Double(d) => Some(Value::Bool(*d != 0.0)),
            Value::Text(s) => Some(Value::Bool(!(s.is_empty() || s == "0" || s == "false"))),
            other => other.as_bool().map(Value::Bool),
        },
        ScalarKind::Bytes => raw.as_bytes().map(|b| Value::Bytes(b.to_vec())),
        ScalarKind::Json => match &raw {
            Value::Json(_) => Some(raw.clone()),
            Value::Text(s) => Some(Value::Json(serde_json::from_str(s)?)),
            other => Some(Value::Json(other.to_json())),
        },
    };
    converted.ok_or_else(|| {
        Error::Type(TypeError {
            expected: scalar_name(kind),
            actual: raw.type_name().to_string(),
            column: None,
        })
    })
}

/// Render a value as text, if it has a textual form.
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::BigInt(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => format_temporal(value),
        Value::Json(j) => Some(j.to_string()),
        Value::Null | Value::Interval(_) => None,
    }
}

/// Convert a raw value to the canonical variant for a temporal kind.
///
/// Timestamps for both naive and UTC date-times, `Date` for dates and `Time`
/// for times of day.
pub fn to_temporal(kind: TemporalKind, raw: &Value) -> Result<Value> {
    let micros = match raw {
        // day-independent time of day, anchored at the epoch
        Value::Interval(micros) | Value::Time(micros) => Some(micros.rem_euclid(MICROS_PER_DAY)),
        Value::Timestamp(micros) => Some(*micros),
        Value::Date(days) => Some(i64::from(*days) * MICROS_PER_DAY),
        Value::Int(_) | Value::BigInt(_) => raw
            .as_i64()
            .and_then(|secs| secs.checked_mul(MICROS_PER_SECOND)),
        Value::Text(s) => parse_temporal_text(s.trim()),
        _ => None,
    };
    let micros = micros.ok_or_else(|| {
        Error::Type(TypeError {
            expected: temporal_name(kind),
            actual: raw.type_name().to_string(),
            column: None,
        })
    })?;
    Ok(match kind {
        TemporalKind::DateTime | TemporalKind::DateTimeUtc => Value::Timestamp(micros),
        TemporalKind::Date => Value::Date(micros.div_euclid(MICROS_PER_DAY) as i32),
        TemporalKind::Time => Value::Time(micros.rem_euclid(MICROS_PER_DAY)),
    })
}

fn parse_temporal_text(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_micros());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(i64::from(date_to_days(date)) * MICROS_PER_DAY);
    }
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(text, format) {
            return Some(time_to_micros(time));
        }
    }
    None
}

/// Format a temporal value the way it is written back to text columns.
///
/// ```
/// use tablebind_core::{Value, coerce::format_temporal};
///
/// assert_eq!(format_temporal(&Value::Date(0)).as_deref(), Some("1970-01-01"));
/// assert_eq!(format_temporal(&Value::Time(3_600_000_000)).as_deref(), Some("01:00:00"));
/// assert_eq!(format_temporal(&Value::Int(1)), None);
/// ```
pub fn format_temporal(value: &Value) -> Option<String> {
    match value {
        Value::Timestamp(micros) => {
            micros_to_datetime(*micros).map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        Value::Date(days) => days_to_date(*days).map(|d| d.format("%Y-%m-%d").to_string()),
        Value::Time(micros) => micros_to_time(*micros).map(|t| t.format("%H:%M:%S%.f").to_string()),
        _ => None,
    }
}

pub fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    let magnitude = Days::new(u64::from(days.unsigned_abs()));
    if days >= 0 {
        epoch().checked_add_days(magnitude)
    } else {
        epoch().checked_sub_days(magnitude)
    }
}

pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

pub fn micros_to_time(micros: i64) -> Option<NaiveTime> {
    let micros = micros.rem_euclid(MICROS_PER_DAY);
    NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / MICROS_PER_SECOND) as u32,
        ((micros % MICROS_PER_SECOND) * 1_000) as u32,
    )
}

pub fn time_to_micros(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * MICROS_PER_SECOND
        + i64::from(time.nanosecond() / 1_000)
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int => "integer",
        ScalarKind::Float => "float",
        ScalarKind::Text => "text",
        ScalarKind::Bool => "bool",
        ScalarKind::Bytes => "bytes",
        ScalarKind::Json => "json",
    }
}

fn temporal_name(kind: TemporalKind) -> &'static str {
    match kind {
        TemporalKind::DateTime | TemporalKind::DateTimeUtc => "datetime",
        TemporalKind::Date => "date",
        TemporalKind::Time => "time",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT: FieldKind = FieldKind::Scalar(ScalarKind::Int);
    const TEXT: FieldKind = FieldKind::Scalar(ScalarKind::Text);
    const DATETIME: FieldKind = FieldKind::Temporal(TemporalKind::DateTime);

    #[test]
    fn null_builtins_become_zero_values() {
        assert_eq!(coerce(INT, false, Value::Null).unwrap(), Value::BigInt(0));
        assert_eq!(coerce(TEXT, false, Value::Null).unwrap(), Value::Text(String::new()));
        assert_eq!(coerce(INT, true, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn scalars_are_cast() {
        assert_eq!(
            coerce(INT, false, Value::Text("42".into())).unwrap(),
            Value::BigInt(42)
        );
        assert_eq!(
            coerce(TEXT, false, Value::BigInt(7)).unwrap(),
            Value::Text("7".into())
        );
        assert_eq!(
            coerce(FieldKind::Scalar(ScalarKind::Bool), false, Value::BigInt(1)).unwrap(),
            Value::Bool(true)
        );
        assert!(coerce(INT, false, Value::Text("abc".into())).is_err());
    }

    #[test]
    fn temporal_null_requires_nullable() {
        assert!(coerce(DATETIME, false, Value::Null).is_err());
        assert_eq!(coerce(DATETIME, true, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn temporal_sources() {
        let from_epoch = coerce(DATETIME, false, Value::BigInt(86_400)).unwrap();
        assert_eq!(from_epoch, Value::Timestamp(MICROS_PER_DAY));

        let from_text = coerce(DATETIME, false, Value::Text("1970-01-02 00:00:00".into())).unwrap();
        assert_eq!(from_text, from_epoch);

        let interval = coerce(
            FieldKind::Temporal(TemporalKind::Time),
            false,
            Value::Interval(MICROS_PER_DAY + 90 * MICROS_PER_SECOND),
        )
        .unwrap();
        assert_eq!(interval, Value::Time(90 * MICROS_PER_SECOND));

        assert!(coerce(DATETIME, false, Value::Bool(true)).is_err());
        assert!(coerce(DATETIME, false, Value::Text("not a date".into())).is_err());
    }

    #[test]
    fn dates_before_epoch() {
        let date = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_eq!(date_to_days(date), -1);
        assert_eq!(days_to_date(-1), Some(date));
    }

    #[test]
    fn enums_pass_through() {
        let raw = Value::Text("b".into());
        assert_eq!(coerce(FieldKind::Enum, false, raw.clone()).unwrap(), raw);
    }
}
