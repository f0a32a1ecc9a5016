use std::sync::Arc;

use crate::config::EnumStrategy;
use crate::error::SqlPipelineError;
use crate::types::{RowValues, SqlType, Value};

use super::{ArgumentFactory, ArgumentRegistry, Encoder, NullEncoder, ValueEncoder};

/// The factories every root registry starts with, in registration order (the last one is
/// consulted first).
#[must_use]
pub fn builtin_factories() -> Vec<Arc<dyn ArgumentFactory>> {
    vec![
        Arc::new(UntypedNullFactory) as Arc<dyn ArgumentFactory>,
        Arc::new(PrimitiveFactory),
        Arc::new(TextFactory),
        Arc::new(BinaryFactory),
        Arc::new(TemporalFactory),
        Arc::new(JsonFactory),
        Arc::new(EnumFactory),
        Arc::new(OptionalFactory),
    ]
}

fn encoded(value: RowValues) -> Option<Arc<dyn Encoder>> {
    let encoder: Arc<dyn Encoder> = Arc::new(ValueEncoder(value));
    Some(encoder)
}

fn null() -> Option<Arc<dyn Encoder>> {
    let encoder: Arc<dyn Encoder> = Arc::new(NullEncoder);
    Some(encoder)
}

/// NULL with no usable declared type.
struct UntypedNullFactory;

impl ArgumentFactory for UntypedNullFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        Ok((*declared == SqlType::Any && value.is_null())
            .then(null)
            .flatten())
    }
}

struct PrimitiveFactory;

fn out_of_range(value: i64, declared: &SqlType) -> SqlPipelineError {
    SqlPipelineError::ConversionError(format!("value {value} is out of range for {declared}"))
}

fn check_range(value: i64, declared: &SqlType) -> Result<i64, SqlPipelineError> {
    let fits = match declared {
        SqlType::I8 => i8::try_from(value).is_ok(),
        SqlType::I16 => i16::try_from(value).is_ok(),
        SqlType::I32 => i32::try_from(value).is_ok(),
        SqlType::U8 => u8::try_from(value).is_ok(),
        SqlType::U16 => u16::try_from(value).is_ok(),
        SqlType::U32 => u32::try_from(value).is_ok(),
        _ => true,
    };
    if fits {
        Ok(value)
    } else {
        Err(out_of_range(value, declared))
    }
}

impl ArgumentFactory for PrimitiveFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        if value.is_null() && declared.is_primitive() {
            if registry.bind_null_to_primitives() {
                return Ok(null());
            }
            return Err(SqlPipelineError::ConversionError(format!(
                "NULL cannot be bound to primitive type {declared}"
            )));
        }

        let encoder = match (declared, value) {
            (SqlType::Bool | SqlType::Any, Value::Bool(b)) => encoded(RowValues::Bool(*b)),
            (SqlType::Any, Value::Int(i)) => encoded(RowValues::Int(*i)),
            (d, Value::Int(i)) if d.is_integer() => encoded(RowValues::Int(check_range(*i, d)?)),
            (SqlType::F32 | SqlType::F64 | SqlType::Any, Value::Float(f)) => {
                encoded(RowValues::Float(*f))
            }
            #[allow(clippy::cast_precision_loss)]
            (SqlType::F32 | SqlType::F64, Value::Int(i)) => encoded(RowValues::Float(*i as f64)),
            _ => None,
        };
        Ok(encoder)
    }
}

struct TextFactory;

impl ArgumentFactory for TextFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        Ok(match (declared, value) {
            (SqlType::Text, Value::Null) => null(),
            (SqlType::Text | SqlType::Any, Value::Text(s)) => encoded(RowValues::Text(s.clone())),
            _ => None,
        })
    }
}

struct BinaryFactory;

impl ArgumentFactory for BinaryFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        Ok(match (declared, value) {
            (SqlType::Blob, Value::Null) => null(),
            (SqlType::Blob | SqlType::Any, Value::Blob(b)) => encoded(RowValues::Blob(b.clone())),
            _ => None,
        })
    }
}

struct TemporalFactory;

impl ArgumentFactory for TemporalFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        Ok(match (declared, value) {
            (SqlType::Timestamp | SqlType::Date | SqlType::Time, Value::Null) => null(),
            (SqlType::Timestamp | SqlType::Any, Value::Timestamp(ts)) => {
                encoded(RowValues::Timestamp(*ts))
            }
            (SqlType::Date | SqlType::Any, Value::Date(d)) => encoded(RowValues::Date(*d)),
            (SqlType::Time | SqlType::Any, Value::Time(t)) => encoded(RowValues::Time(*t)),
            _ => None,
        })
    }
}

struct JsonFactory;

impl ArgumentFactory for JsonFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        Ok(match (declared, value) {
            (SqlType::Json, Value::Null) => null(),
            (SqlType::Json | SqlType::Any, Value::Json(j)) => encoded(RowValues::JSON(j.clone())),
            _ => None,
        })
    }
}

/// Enumerations, re-resolved as text (by name) or as an `I32` (by ordinal).
struct EnumFactory;

fn enum_carrier(strategy: EnumStrategy) -> SqlType {
    match strategy {
        EnumStrategy::ByName => SqlType::Text,
        EnumStrategy::ByOrdinal => SqlType::I32,
    }
}

impl ArgumentFactory for EnumFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        let carrier = enum_carrier(registry.enum_strategy());
        match (declared, value) {
            (SqlType::Enum(_), Value::Null) => {
                registry.resolve(&carrier, &Value::Null).map(Some)
            }
            (SqlType::Enum(ty), Value::Enum(e)) if e.enum_type() != *ty => Ok(None),
            (SqlType::Enum(_) | SqlType::Any, Value::Enum(e)) => {
                let inner = match registry.enum_strategy() {
                    EnumStrategy::ByName => Value::Text(e.name().to_string()),
                    EnumStrategy::ByOrdinal => {
                        let ordinal = i64::try_from(e.ordinal()).map_err(|_| {
                            SqlPipelineError::ConversionError(format!(
                                "ordinal {} does not fit in an integer",
                                e.ordinal()
                            ))
                        })?;
                        Value::Int(ordinal)
                    }
                };
                registry.resolve(&carrier, &inner).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Optional values: empty binds NULL, present is resolved against the wrapped type.
struct OptionalFactory;

impl ArgumentFactory for OptionalFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        match (declared, value) {
            (SqlType::Optional(_), Value::Null | Value::Optional(None))
            | (SqlType::Any, Value::Optional(None)) => Ok(null()),
            (SqlType::Optional(inner), Value::Optional(Some(v))) => {
                registry.resolve(inner, v).map(Some)
            }
            (SqlType::Optional(inner), v) => registry.resolve(inner, v).map(Some),
            (SqlType::Any, Value::Optional(Some(v))) => {
                registry.resolve(&SqlType::Any, v).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_utils::RecordingStatement;
    use crate::types::{EnumType, EnumValue};
    use chrono::NaiveDate;

    fn bound(declared: SqlType, value: Value) -> Result<RowValues, SqlPipelineError> {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        let encoder = registry.resolve(&declared, &value)?;
        let mut stmt = RecordingStatement::default();
        encoder.apply(1, &mut stmt)?;
        Ok(stmt.bound(1).cloned().unwrap_or(RowValues::Null))
    }

    #[test]
    fn untyped_null_binds_null() {
        assert_eq!(bound(SqlType::Any, Value::Null).unwrap(), RowValues::Null);
    }

    #[test]
    fn temporal_values_keep_their_kind() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(bound(SqlType::Date, Value::Date(d)).unwrap(), RowValues::Date(d));
        assert_eq!(bound(SqlType::Date, Value::Null).unwrap(), RowValues::Null);
    }

    #[test]
    fn floats_accept_integers() {
        assert_eq!(
            bound(SqlType::F64, Value::Int(2)).unwrap(),
            RowValues::Float(2.0)
        );
    }

    #[test]
    fn unsigned_rejects_negative() {
        assert!(bound(SqlType::U16, Value::Int(-1)).is_err());
        assert_eq!(
            bound(SqlType::U32, Value::Int(4_000_000_000)).unwrap(),
            RowValues::Int(4_000_000_000)
        );
    }

    #[test]
    fn nested_optional_enum_unwraps_fully() {
        const LEVEL: EnumType = EnumType::new("Level", &["Low", "High"]);
        let value = Value::Optional(Some(Box::new(Value::Enum(
            EnumValue::new(LEVEL, 0).unwrap(),
        ))));
        assert_eq!(
            bound(SqlType::optional(SqlType::Enum(LEVEL)), value).unwrap(),
            RowValues::Text("Low".into())
        );
    }

    #[test]
    fn mismatched_enum_type_falls_back_to_any() {
        const A: EnumType = EnumType::new("A", &["X"]);
        const B: EnumType = EnumType::new("B", &["Y"]);
        let value = Value::Enum(EnumValue::new(A, 0).unwrap());
        assert_eq!(
            bound(SqlType::Enum(B), value).unwrap(),
            RowValues::Text("X".into())
        );
    }
}
