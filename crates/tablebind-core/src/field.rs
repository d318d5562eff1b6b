//! Field slots and their type descriptions.
//!
//! Every field of a model struct implements [`FieldSlot`]. The slot is the
//! type-erased handle the session uses to read and write a field without
//! knowing the concrete Rust type: scalars convert to and from [`Value`],
//! relation and extend slots expose their own sub-traits.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coerce;
use crate::error::{Error, Result, TypeError};
use crate::model::ModelType;
use crate::relationship::{ExtendSlot, RelationSlot};
use crate::value::Value;

/// Built-in scalar categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Int,
    Float,
    Text,
    Bool,
    Bytes,
    Json,
}

/// Date/time categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalKind {
    /// Naive date and time
    DateTime,
    /// Date and time in UTC
    DateTimeUtc,
    /// Calendar date
    Date,
    /// Time of day
    Time,
}

/// What a field holds, as seen by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Temporal(TemporalKind),
    /// A value-backed enumeration
    Enum,
    /// A value object spread over several columns
    Extend,
    /// A single related model
    Model(ModelType),
    /// A collection of related models
    Collection(ModelType),
}

impl TypeKind {
    /// The serializable form stored in resolved configuration.
    pub fn field_kind(self) -> FieldKind {
        match self {
            TypeKind::Scalar(kind) => FieldKind::Scalar(kind),
            TypeKind::Temporal(kind) => FieldKind::Temporal(kind),
            TypeKind::Enum => FieldKind::Enum,
            TypeKind::Extend => FieldKind::Extend,
            TypeKind::Model(_) => FieldKind::Model,
            TypeKind::Collection(_) => FieldKind::Collection,
        }
    }

    /// The related model type for model and collection fields.
    pub fn model_type(self) -> Option<ModelType> {
        match self {
            TypeKind::Model(m) | TypeKind::Collection(m) => Some(m),
            _ => None,
        }
    }
}

/// Serializable field category, as recorded in a resolved model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarKind),
    Temporal(TemporalKind),
    Enum,
    Extend,
    Model,
    Collection,
}

impl FieldKind {
    /// Built-in scalars get zero values for NULL and are never instantiable.
    pub fn is_builtin(self) -> bool {
        matches!(self, FieldKind::Scalar(_))
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, FieldKind::Temporal(_))
    }
}

/// Static description of a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    /// Short Rust type name, used in messages and configuration
    pub name: &'static str,
    pub kind: TypeKind,
    pub nullable: bool,
}

impl TypeInfo {
    pub const fn new(name: &'static str, kind: TypeKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Conversion between a Rust type and a database [`Value`].
pub trait ColumnType: Sized + 'static {
    fn type_info() -> TypeInfo;

    /// Convert from a value. Values are expected in the canonical form
    /// produced by coercion, but drivers' raw forms are accepted too.
    fn from_value(value: Value) -> Result<Self>;

    fn to_value(&self) -> Value;
}

/// Type-erased access to one field of a model.
///
/// Scalar slots implement [`to_value`](FieldSlot::to_value) and
/// [`assign`](FieldSlot::assign); relation and extend slots expose
/// themselves through the `as_*` accessors instead.
pub trait FieldSlot: 'static {
    fn type_info() -> TypeInfo
    where
        Self: Sized;

    /// Current value of a scalar field.
    fn to_value(&self) -> Option<Value> {
        None
    }

    /// Store a value that has already been coerced to this field's kind.
    fn assign(&mut self, value: Value) -> Result<()> {
        Err(Error::Type(TypeError {
            expected: "scalar field",
            actual: value.type_name().to_string(),
            column: None,
        }))
    }

    /// `true` when the field has never been given a value.
    fn is_unset(&self) -> bool {
        false
    }

    /// Replace the value with a fresh default. Returns `false` when the type
    /// has no meaningful default instance.
    fn instantiate(&mut self) -> bool {
        false
    }

    fn as_relation(&self) -> Option<&dyn RelationSlot> {
        None
    }

    fn as_relation_mut(&mut self) -> Option<&mut dyn RelationSlot> {
        None
    }

    fn as_extend(&self) -> Option<&dyn ExtendSlot> {
        None
    }

    fn as_extend_mut(&mut self) -> Option<&mut dyn ExtendSlot> {
        None
    }
}

/// An enumeration stored as a single string or integer value.
pub trait BackedEnum: Sized + 'static {
    /// Look up the variant for a stored value.
    fn from_backing(value: &Value) -> Option<Self>;

    /// The value stored for this variant.
    fn backing(&self) -> Value;
}

/// Normalize a stored enum value to the string compared against backings.
pub fn backing_key(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        other => other.as_i64().map(|i| i.to_string()),
    }
}

pub(crate) fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
    })
}

/// Implement [`FieldSlot`] for types that already implement [`ColumnType`].
#[macro_export]
macro_rules! impl_column_field {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::field::FieldSlot for $ty {
            fn type_info() -> $crate::field::TypeInfo {
                <$ty as $crate::field::ColumnType>::type_info()
            }

            fn to_value(&self) -> ::core::option::Option<$crate::Value> {
                ::core::option::Option::Some($crate::field::ColumnType::to_value(self))
            }

            fn assign(&mut self, value: $crate::Value) -> $crate::Result<()> {
                *self = <$ty as $crate::field::ColumnType>::from_value(value)?;
                ::core::result::Result::Ok(())
            }
        }
    )*};
}

macro_rules! int_column {
    ($($ty:ty),*) => {$(
        impl ColumnType for $ty {
            fn type_info() -> TypeInfo {
                TypeInfo::new(stringify!($ty), TypeKind::Scalar(ScalarKind::Int))
            }

            fn from_value(value: Value) -> Result<Self> {
                let wide = match &value {
                    Value::Double(d) => Some(d.trunc() as i64),
                    other => other.as_id(),
                };
                wide.and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| mismatch(stringify!($ty), &value))
            }

            fn to_value(&self) -> Value {
                Value::BigInt(i64::from(*self))
            }
        }
    )*};
}

int_column!(i8, i16, i32, i64, u8, u16, u32);

impl ColumnType for f64 {
    fn type_info() -> TypeInfo {
        TypeInfo::new("f64", TypeKind::Scalar(ScalarKind::Float))
    }

    fn from_value(value: Value) -> Result<Self> {
        match &value {
            Value::Text(s) => s.trim().parse().ok(),
            other => other.as_f64(),
        }
        .ok_or_else(|| mismatch("f64", &value))
    }

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }
}

impl ColumnType for f32 {
    fn type_info() -> TypeInfo {
        TypeInfo::new("f32", TypeKind::Scalar(ScalarKind::Float))
    }

    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }

    fn to_value(&self) -> Value {
        Value::Double(f64::from(*self))
    }
}

impl ColumnType for String {
    fn type_info() -> TypeInfo {
        TypeInfo::new("String", TypeKind::Scalar(ScalarKind::Text))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => coerce::to_text(&other).ok_or_else(|| mismatch("String", &other)),
        }
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ColumnType for bool {
    fn type_info() -> TypeInfo {
        TypeInfo::new("bool", TypeKind::Scalar(ScalarKind::Bool))
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ColumnType for Vec<u8> {
    fn type_info() -> TypeInfo {
        TypeInfo::new("Vec<u8>", TypeKind::Scalar(ScalarKind::Bytes))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl ColumnType for serde_json::Value {
    fn type_info() -> TypeInfo {
        TypeInfo::new("serde_json::Value", TypeKind::Scalar(ScalarKind::Json))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => Ok(serde_json::from_str(&s)?),
            other => Ok(other.to_json()),
        }
    }

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }
}

impl ColumnType for NaiveDateTime {
    fn type_info() -> TypeInfo {
        TypeInfo::new("NaiveDateTime", TypeKind::Temporal(TemporalKind::DateTime))
    }

    fn from_value(value: Value) -> Result<Self> {
        match coerce::to_temporal(TemporalKind::DateTime, &value)? {
            Value::Timestamp(micros) => coerce::micros_to_datetime(micros),
            _ => None,
        }
        .ok_or_else(|| mismatch("NaiveDateTime", &value))
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.and_utc().timestamp_micros())
    }
}

impl ColumnType for DateTime<Utc> {
    fn type_info() -> TypeInfo {
        TypeInfo::new("DateTime<Utc>", TypeKind::Temporal(TemporalKind::DateTimeUtc))
    }

    fn from_value(value: Value) -> Result<Self> {
        NaiveDateTime::from_value(value).map(|dt| dt.and_utc())
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(self.timestamp_micros())
    }
}

impl ColumnType for NaiveDate {
    fn type_info() -> TypeInfo {
        TypeInfo::new("NaiveDate", TypeKind::Temporal(TemporalKind::Date))
    }

    fn from_value(value: Value) -> Result<Self> {
        match coerce::to_temporal(TemporalKind::Date, &value)? {
            Value::Date(days) => coerce::days_to_date(days),
            _ => None,
        }
        .ok_or_else(|| mismatch("NaiveDate", &value))
    }

    fn to_value(&self) -> Value {
        Value::Date(coerce::date_to_days(*self))
    }
}

impl ColumnType for NaiveTime {
    fn type_info() -> TypeInfo {
        TypeInfo::new("NaiveTime", TypeKind::Temporal(TemporalKind::Time))
    }

    fn from_value(value: Value) -> Result<Self> {
        match coerce::to_temporal(TemporalKind::Time, &value)? {
            Value::Time(micros) => coerce::micros_to_time(micros),
            _ => None,
        }
        .ok_or_else(|| mismatch("NaiveTime", &value))
    }

    fn to_value(&self) -> Value {
        Value::Time(coerce::time_to_micros(*self))
    }
}

impl_column_field!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    String,
    bool,
    Vec<u8>,
    serde_json::Value,
    NaiveDateTime,
    DateTime<Utc>,
    NaiveDate,
    NaiveTime,
);

impl<T: ColumnType> FieldSlot for Option<T> {
    fn type_info() -> TypeInfo {
        T::type_info().nullable()
    }

    fn to_value(&self) -> Option<Value> {
        Some(self.as_ref().map_or(Value::Null, ColumnType::to_value))
    }

    fn assign(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            *self = None;
            return Ok(());
        }
        *self = match T::from_value(value) {
            Ok(v) => Some(v),
            // unknown enum backings read as absent on nullable fields
            Err(_) if T::type_info().kind == TypeKind::Enum => None,
            Err(e) => return Err(e),
        };
        Ok(())
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_slots_accept_driver_forms() {
        let mut age = 0i32;
        age.assign(Value::BigInt(10)).unwrap();
        assert_eq!(age, 10);
        age.assign(Value::Text("12".into())).unwrap();
        assert_eq!(age, 12);
        assert!(age.assign(Value::BigInt(i64::MAX)).is_err());
        assert_eq!(FieldSlot::to_value(&age), Some(Value::BigInt(12)));
    }

    #[test]
    fn optional_slots_are_nullable() {
        let info = <Option<String> as FieldSlot>::type_info();
        assert!(info.nullable);
        assert_eq!(info.kind, TypeKind::Scalar(ScalarKind::Text));

        let mut name: Option<String> = None;
        assert!(name.is_unset());
        name.assign(Value::Text("x".into())).unwrap();
        assert_eq!(name.as_deref(), Some("x"));
        name.assign(Value::Null).unwrap();
        assert!(name.is_none());
        assert_eq!(name.to_value(), Some(Value::Null));
    }

    #[test]
    fn temporal_slots_round_trip_canonical_values() {
        let mut date = NaiveDate::default();
        date.assign(Value::Text("2024-02-29".into())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let mut at = NaiveDateTime::default();
        at.assign(Value::Text("2024-01-02 03:04:05".into())).unwrap();
        assert_eq!(at.to_string(), "2024-01-02 03:04:05");
        assert_eq!(
            FieldSlot::to_value(&at),
            Some(Value::Timestamp(at.and_utc().timestamp_micros()))
        );
    }

    #[test]
    fn scalars_are_not_instantiable() {
        let mut n = 5i64;
        assert!(!n.instantiate());
        assert!(n.as_relation().is_none());
    }

    #[derive(Debug, PartialEq)]
    enum Shade {
        Light,
        Dark,
    }

    impl BackedEnum for Shade {
        fn from_backing(value: &Value) -> Option<Self> {
            match backing_key(value)?.as_str() {
                "light" => Some(Self::Light),
                "dark" => Some(Self::Dark),
                _ => None,
            }
        }

        fn backing(&self) -> Value {
            Value::Text(match self {
                Self::Light => "light".into(),
                Self::Dark => "dark".into(),
            })
        }
    }

    impl ColumnType for Shade {
        fn type_info() -> TypeInfo {
            TypeInfo::new("Shade", TypeKind::Enum)
        }

        fn from_value(value: Value) -> Result<Self> {
            Self::from_backing(&value).ok_or_else(|| mismatch("Shade", &value))
        }

        fn to_value(&self) -> Value {
            self.backing()
        }
    }

    impl_column_field!(Shade);

    #[test]
    fn unknown_backings_depend_on_nullability() {
        let mut shade = Shade::Light;
        shade.assign(Value::Text("dark".into())).unwrap();
        assert_eq!(shade, Shade::Dark);
        let err = shade.assign(Value::Text("mauve".into())).unwrap_err();
        assert!(matches!(err, Error::Type(TypeError { expected: "Shade", .. })));
        assert_eq!(shade, Shade::Dark);

        let mut maybe: Option<Shade> = Some(Shade::Light);
        maybe.assign(Value::Text("mauve".into())).unwrap();
        assert_eq!(maybe, None);
        maybe.assign(Value::Text("light".into())).unwrap();
        assert_eq!(maybe, Some(Shade::Light));
    }

    #[test]
    fn unknown_backings_still_fail_other_nullable_types() {
        let mut count: Option<i32> = None;
        assert!(count.assign(Value::Text("many".into())).is_err());
    }

    #[test]
    fn backing_keys() {
        assert_eq!(backing_key(&Value::Text("a".into())), Some("a".into()));
        assert_eq!(backing_key(&Value::BigInt(2)), Some("2".into()));
        assert_eq!(backing_key(&Value::Double(1.5)), None);
    }
}
