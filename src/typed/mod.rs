//! Bridge between Rust types and the declared-type model used by the registries.

use std::any::Any;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::SqlPipelineError;
use crate::mapper::DB_ROW;
use crate::results::DbRow;
use crate::types::{CustomValue, EnumType, EnumValue, SqlType, Value};

#[macro_use]
mod macros;

/// A Rust type with a declared [`SqlType`] that converts to and from [`Value`].
///
/// Binding uses `sql_type` plus `into_value` to pick an encoder; `select_as` resolves a mapper
/// for `sql_type` and finishes with `from_value`.
pub trait SqlTyped: Sized {
    fn sql_type() -> SqlType;

    fn into_value(self) -> Value;

    /// # Errors
    ///
    /// Returns an error if `value` does not hold this type.
    fn from_value(value: Value) -> Result<Self, SqlPipelineError>;
}

fn mismatch(expected: &SqlType, got: &Value) -> SqlPipelineError {
    if got.is_null() {
        return SqlPipelineError::UnexpectedNull(expected.clone());
    }
    SqlPipelineError::ConversionError(format!("expected {expected}, found {} value", got.kind()))
}

macro_rules! impl_integer {
    ($($ty:ty => $sql:ident),* $(,)?) => {
        $(
            impl SqlTyped for $ty {
                fn sql_type() -> SqlType {
                    SqlType::$sql
                }

                fn into_value(self) -> Value {
                    Value::Int(i64::from(self))
                }

                fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i).map_err(|_| {
                            SqlPipelineError::ConversionError(format!(
                                "value {i} is out of range for {}",
                                SqlType::$sql
                            ))
                        }),
                        other => Err(mismatch(&SqlType::$sql, &other)),
                    }
                }
            }
        )*
    };
}

impl_integer!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
);

impl SqlTyped for bool {
    fn sql_type() -> SqlType {
        SqlType::Bool
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(mismatch(&SqlType::Bool, &other)),
        }
    }
}

impl SqlTyped for f64 {
    fn sql_type() -> SqlType {
        SqlType::F64
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        match value {
            Value::Float(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch(&SqlType::F64, &other)),
        }
    }
}

impl SqlTyped for f32 {
    fn sql_type() -> SqlType {
        SqlType::F32
    }

    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        match value {
            Value::Float(f) => Ok(f as f32),
            Value::Int(i) => Ok(i as f32),
            other => Err(mismatch(&SqlType::F32, &other)),
        }
    }
}

macro_rules! impl_reference {
    ($($ty:ty => $sql:ident / $variant:ident),* $(,)?) => {
        $(
            impl SqlTyped for $ty {
                fn sql_type() -> SqlType {
                    SqlType::$sql
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(&SqlType::$sql, &other)),
                    }
                }
            }
        )*
    };
}

impl_reference!(
    String => Text / Text,
    Vec<u8> => Blob / Blob,
    NaiveDateTime => Timestamp / Timestamp,
    NaiveDate => Date / Date,
    NaiveTime => Time / Time,
    JsonValue => Json / Json,
);

impl SqlTyped for DateTime<Utc> {
    fn sql_type() -> SqlType {
        SqlType::Timestamp
    }

    fn into_value(self) -> Value {
        Value::Timestamp(self.naive_utc())
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        match value {
            Value::Timestamp(ts) => Ok(DateTime::from_naive_utc_and_offset(ts, Utc)),
            other => Err(mismatch(&SqlType::Timestamp, &other)),
        }
    }
}

impl<T: SqlTyped> SqlTyped for Option<T> {
    fn sql_type() -> SqlType {
        SqlType::optional(T::sql_type())
    }

    fn into_value(self) -> Value {
        Value::Optional(self.map(|v| Box::new(v.into_value())))
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        match value {
            Value::Null | Value::Optional(None) => Ok(None),
            Value::Optional(Some(inner)) => T::from_value(*inner).map(Some),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Untyped passthrough; resolves against `SqlType::Any`.
impl SqlTyped for Value {
    fn sql_type() -> SqlType {
        SqlType::Any
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        Ok(value)
    }
}

impl SqlTyped for DbRow {
    fn sql_type() -> SqlType {
        SqlType::Custom(DB_ROW)
    }

    fn into_value(self) -> Value {
        Value::Custom(CustomValue::new(DB_ROW, self))
    }

    fn from_value(value: Value) -> Result<Self, SqlPipelineError> {
        custom_from_value(value, DB_ROW)
    }
}

/// Enum value for the variant called `name`; used by [`impl_sql_enum!`].
#[doc(hidden)]
#[must_use]
pub fn enum_value(ty: EnumType, name: &str) -> Value {
    ty.ordinal_of(name)
        .and_then(|ordinal| EnumValue::new(ty, ordinal))
        .map_or(Value::Null, Value::Enum)
}

/// Variant name carried by `value`; used by [`impl_sql_enum!`].
///
/// # Errors
///
/// Returns an error if `value` is not an enum of type `ty`.
#[doc(hidden)]
pub fn enum_name(value: Value, ty: EnumType) -> Result<&'static str, SqlPipelineError> {
    match value {
        Value::Enum(e) if e.enum_type() == ty => Ok(e.name()),
        other => Err(mismatch(&SqlType::Enum(ty), &other)),
    }
}

/// Clone the `T` out of a custom value named `type_name`; used by [`impl_sql_custom!`].
///
/// # Errors
///
/// Returns an error if `value` is not a custom value of that name holding a `T`.
#[doc(hidden)]
pub fn custom_from_value<T: Any + Clone>(
    value: Value,
    type_name: &'static str,
) -> Result<T, SqlPipelineError> {
    match value {
        Value::Custom(custom) if custom.type_name() == type_name => custom
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| {
                SqlPipelineError::ConversionError(format!(
                    "custom value {type_name} holds a different Rust type"
                ))
            }),
        other => Err(mismatch(&SqlType::Custom(type_name), &other)),
    }
}
