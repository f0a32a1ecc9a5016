use std::sync::Arc;

use crate::config::EnumStrategy;
use crate::error::SqlPipelineError;
use crate::results::DbRow;
use crate::types::{CustomValue, EnumType, EnumValue, RowValues, SqlType, Value};

use super::{
    ColumnMapper, ColumnMapperFactory, MappingRegistry, RowMapper, RowMapperFactory, column,
};

/// Row factories every root registry starts with.
#[must_use]
pub fn builtin_row_factories() -> Vec<Arc<dyn RowMapperFactory>> {
    vec![Arc::new(DbRowMapperFactory) as Arc<dyn RowMapperFactory>]
}

/// Column factories every root registry starts with, in registration order.
#[must_use]
pub fn builtin_column_factories() -> Vec<Arc<dyn ColumnMapperFactory>> {
    vec![
        Arc::new(BuiltInColumnMapperFactory) as Arc<dyn ColumnMapperFactory>,
        Arc::new(OptionalColumnMapperFactory),
    ]
}

/// Type name under which whole rows travel as custom values.
pub(crate) const DB_ROW: &str = "DbRow";

struct DbRowMapperFactory;

impl RowMapperFactory for DbRowMapperFactory {
    fn build(
        &self,
        ty: &SqlType,
        _registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn RowMapper>>, SqlPipelineError> {
        if *ty != SqlType::Custom(DB_ROW) {
            return Ok(None);
        }
        let mapper: Arc<dyn RowMapper> = Arc::new(|row: &DbRow| -> Result<Value, SqlPipelineError> {
            Ok(Value::Custom(CustomValue::new(DB_ROW, row.clone())))
        });
        Ok(Some(mapper))
    }
}

fn conversion(ty: &SqlType, value: &RowValues) -> SqlPipelineError {
    SqlPipelineError::ConversionError(format!("cannot map {value:?} to {ty}"))
}

fn primitive_default(ty: &SqlType) -> Value {
    match ty {
        SqlType::Bool => Value::Bool(false),
        SqlType::F32 | SqlType::F64 => Value::Float(0.0),
        _ => Value::Int(0),
    }
}

fn integer_in_range(ty: &SqlType, value: i64) -> bool {
    match ty {
        SqlType::I8 => i8::try_from(value).is_ok(),
        SqlType::I16 => i16::try_from(value).is_ok(),
        SqlType::I32 => i32::try_from(value).is_ok(),
        SqlType::U8 => u8::try_from(value).is_ok(),
        SqlType::U16 => u16::try_from(value).is_ok(),
        SqlType::U32 => u32::try_from(value).is_ok(),
        _ => true,
    }
}

/// Column mapper for the scalar types the value model knows about.
struct ScalarColumnMapper {
    ty: SqlType,
    enum_strategy: EnumStrategy,
    coalesce_null_primitives: bool,
}

impl ScalarColumnMapper {
    fn map_value(&self, raw: &RowValues) -> Result<Value, SqlPipelineError> {
        let ty = &self.ty;
        if raw.is_null() {
            if !ty.is_primitive() {
                return Ok(Value::Null);
            }
            if self.coalesce_null_primitives {
                return Ok(primitive_default(ty));
            }
            return Err(SqlPipelineError::UnexpectedNull(ty.clone()));
        }

        match ty {
            SqlType::Any => Ok(Value::from(raw.clone())),
            SqlType::Bool => raw
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| conversion(ty, raw)),
            t if t.is_integer() => {
                let i = match raw {
                    RowValues::Int(i) => *i,
                    RowValues::Bool(b) => i64::from(*b),
                    _ => return Err(conversion(ty, raw)),
                };
                if integer_in_range(ty, i) {
                    Ok(Value::Int(i))
                } else {
                    Err(SqlPipelineError::ConversionError(format!(
                        "value {i} is out of range for {ty}"
                    )))
                }
            }
            SqlType::F32 | SqlType::F64 => raw
                .as_float()
                .map(Value::Float)
                .ok_or_else(|| conversion(ty, raw)),
            SqlType::Text => match raw {
                RowValues::Text(s) => Ok(Value::Text(s.clone())),
                RowValues::Int(i) => Ok(Value::Text(i.to_string())),
                RowValues::Float(f) => Ok(Value::Text(f.to_string())),
                _ => Err(conversion(ty, raw)),
            },
            SqlType::Blob => raw
                .as_blob()
                .map(|b| Value::Blob(b.to_vec()))
                .ok_or_else(|| conversion(ty, raw)),
            SqlType::Timestamp => raw
                .as_timestamp()
                .map(Value::Timestamp)
                .ok_or_else(|| conversion(ty, raw)),
            SqlType::Date => raw
                .as_date()
                .map(Value::Date)
                .ok_or_else(|| conversion(ty, raw)),
            SqlType::Time => raw
                .as_time()
                .map(Value::Time)
                .ok_or_else(|| conversion(ty, raw)),
            SqlType::Json => match raw {
                RowValues::JSON(j) => Ok(Value::Json(j.clone())),
                RowValues::Text(s) => serde_json::from_str(s)
                    .map(Value::Json)
                    .map_err(|e| SqlPipelineError::ConversionError(format!("invalid JSON: {e}"))),
                _ => Err(conversion(ty, raw)),
            },
            SqlType::Enum(enum_type) => self.map_enum(*enum_type, raw),
            _ => Err(conversion(ty, raw)),
        }
    }

    fn map_enum(&self, enum_type: EnumType, raw: &RowValues) -> Result<Value, SqlPipelineError> {
        let ordinal = match self.enum_strategy {
            EnumStrategy::ByName => {
                let name = raw.as_text().ok_or_else(|| conversion(&self.ty, raw))?;
                enum_type
                    .ordinal_of(name)
                    .or_else(|| enum_type.ordinal_of_ignore_case(name))
                    .ok_or_else(|| {
                        SqlPipelineError::ConversionError(format!(
                            "{name} is not a variant of {}",
                            enum_type.name()
                        ))
                    })?
            }
            EnumStrategy::ByOrdinal => {
                let i = raw.as_int().ok_or_else(|| conversion(&self.ty, raw))?;
                usize::try_from(*i).map_err(|_| conversion(&self.ty, raw))?
            }
        };
        EnumValue::new(enum_type, ordinal)
            .map(Value::Enum)
            .ok_or_else(|| {
                SqlPipelineError::ConversionError(format!(
                    "ordinal {ordinal} is out of range for {}",
                    enum_type.name()
                ))
            })
    }
}

impl ColumnMapper for ScalarColumnMapper {
    fn map(&self, row: &DbRow, index: usize) -> Result<Value, SqlPipelineError> {
        self.map_value(column(row, index)?)
    }
}

struct BuiltInColumnMapperFactory;

impl ColumnMapperFactory for BuiltInColumnMapperFactory {
    fn build(
        &self,
        ty: &SqlType,
        registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn ColumnMapper>>, SqlPipelineError> {
        if matches!(ty, SqlType::Optional(_) | SqlType::Custom(_)) {
            return Ok(None);
        }
        let mapper: Arc<dyn ColumnMapper> = Arc::new(ScalarColumnMapper {
            ty: ty.clone(),
            enum_strategy: registry.enum_strategy(),
            coalesce_null_primitives: registry.coalesce_null_primitives(),
        });
        Ok(Some(mapper))
    }
}

/// `Optional(T)`: NULL becomes an empty optional, anything else goes through `T`'s mapper.
struct OptionalColumnMapperFactory;

struct OptionalColumnMapper(Arc<dyn ColumnMapper>);

impl ColumnMapper for OptionalColumnMapper {
    fn map(&self, row: &DbRow, index: usize) -> Result<Value, SqlPipelineError> {
        if column(row, index)?.is_null() {
            return Ok(Value::Optional(None));
        }
        let inner = self.0.map(row, index)?;
        Ok(Value::Optional(Some(Box::new(inner))))
    }
}

impl ColumnMapperFactory for OptionalColumnMapperFactory {
    fn build(
        &self,
        ty: &SqlType,
        registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn ColumnMapper>>, SqlPipelineError> {
        let SqlType::Optional(inner) = ty else {
            return Ok(None);
        };
        let mapper: Arc<dyn ColumnMapper> =
            Arc::new(OptionalColumnMapper(registry.resolve_column(inner)?));
        Ok(Some(mapper))
    }
}
