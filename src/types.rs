use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

/// Values exchanged with the driver: bound into native parameter slots and read back out of
/// result cursors.
///
/// Every encoder eventually produces one of these, and every column mapper starts from one:
/// ```rust
/// use sql_pipeline::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let RowValues::Bool(value) = self {
            return Some(*value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(true);
            } else if *i == 0 {
                return Some(false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            RowValues::Date(d) => Some(*d),
            RowValues::Timestamp(ts) => Some(ts.date()),
            RowValues::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            RowValues::Time(t) => Some(*t),
            RowValues::Text(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            RowValues::Blob(bytes) => Some(bytes),
            RowValues::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

/// Descriptor of an enumeration: its name plus the variant names in ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: &'static str,
    variants: &'static [&'static str],
}

impl EnumType {
    #[must_use]
    pub const fn new(name: &'static str, variants: &'static [&'static str]) -> Self {
        Self { name, variants }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn variants(&self) -> &'static [&'static str] {
        self.variants
    }

    /// Ordinal of the variant with exactly this name.
    #[must_use]
    pub fn ordinal_of(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| *v == variant)
    }

    /// Ordinal of the variant matching `variant` ignoring ASCII case.
    #[must_use]
    pub fn ordinal_of_ignore_case(&self, variant: &str) -> Option<usize> {
        self.variants
            .iter()
            .position(|v| v.eq_ignore_ascii_case(variant))
    }
}

/// Declared type of a bound argument or of a mapping target.
///
/// Registries key their factories and caches on this descriptor; `Any` is the fallback type
/// consulted when no factory accepts the exact declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Any,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    F32,
    F64,
    Text,
    Blob,
    Timestamp,
    Date,
    Time,
    Json,
    Enum(EnumType),
    Optional(Box<SqlType>),
    Custom(&'static str),
}

impl SqlType {
    #[must_use]
    pub fn optional(inner: SqlType) -> Self {
        SqlType::Optional(Box::new(inner))
    }

    /// Types whose NULL has no natural representation and is coalesced to a default
    /// (or rejected) depending on configuration.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            SqlType::Bool
                | SqlType::I8
                | SqlType::I16
                | SqlType::I32
                | SqlType::I64
                | SqlType::U8
                | SqlType::U16
                | SqlType::U32
                | SqlType::F32
                | SqlType::F64
        )
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::I8
                | SqlType::I16
                | SqlType::I32
                | SqlType::I64
                | SqlType::U8
                | SqlType::U16
                | SqlType::U32
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Enum(e) => write!(f, "Enum({})", e.name()),
            SqlType::Optional(inner) => write!(f, "Optional<{inner}>"),
            SqlType::Custom(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A value of some enumeration, carried by its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    ty: EnumType,
    ordinal: usize,
}

impl EnumValue {
    /// Returns `None` when `ordinal` is outside the enum's variant list.
    #[must_use]
    pub fn new(ty: EnumType, ordinal: usize) -> Option<Self> {
        (ordinal < ty.variants().len()).then_some(Self { ty, ordinal })
    }

    #[must_use]
    pub fn enum_type(&self) -> EnumType {
        self.ty
    }

    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.ty.variants()[self.ordinal]
    }
}

/// Opaque user value travelling through the registries, tagged with its declared type name.
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Self {
            type_name,
            inner: Arc::new(value),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Loosely typed run-time value handed to the argument registry, and produced by mappers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
    Enum(EnumValue),
    Optional(Option<Box<Value>>),
    Custom(CustomValue),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Optional(None))
    }

    /// Short tag used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
            Value::Enum(_) => "enum",
            Value::Optional(_) => "optional",
            Value::Custom(c) => c.type_name(),
        }
    }
}

impl From<RowValues> for Value {
    fn from(value: RowValues) -> Self {
        match value {
            RowValues::Int(i) => Value::Int(i),
            RowValues::Float(f) => Value::Float(f),
            RowValues::Text(s) => Value::Text(s),
            RowValues::Bool(b) => Value::Bool(b),
            RowValues::Timestamp(ts) => Value::Timestamp(ts),
            RowValues::Date(d) => Value::Date(d),
            RowValues::Time(t) => Value::Time(t),
            RowValues::Null => Value::Null,
            RowValues::JSON(j) => Value::Json(j),
            RowValues::Blob(b) => Value::Blob(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: EnumType = EnumType::new("Color", &["Red", "Green"]);

    #[test]
    fn row_values_accessors_fall_back_on_text() {
        let ts = RowValues::Text("2024-01-02 03:04:05".into());
        assert!(ts.as_timestamp().is_some());
        assert_eq!(
            RowValues::Text("2024-01-02".into()).as_date(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert_eq!(RowValues::Int(1).as_bool(), Some(true));
        assert_eq!(RowValues::Int(7).as_bool(), None);
    }

    #[test]
    fn enum_lookup_by_name() {
        assert_eq!(COLOR.ordinal_of("Green"), Some(1));
        assert_eq!(COLOR.ordinal_of("green"), None);
        assert_eq!(COLOR.ordinal_of_ignore_case("green"), Some(1));
        assert!(EnumValue::new(COLOR, 2).is_none());
        assert_eq!(EnumValue::new(COLOR, 0).map(|v| v.name()), Some("Red"));
    }

    #[test]
    fn custom_values_compare_by_identity() {
        let a = CustomValue::new("Point", (1, 2));
        let b = CustomValue::new("Point", (1, 2));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<(i32, i32)>(), Some(&(1, 2)));
    }
}
