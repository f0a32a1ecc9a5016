/// Implement [`SqlTyped`](crate::typed::SqlTyped) for a fieldless enum.
///
/// Variants are listed in ordinal order; with the by-ordinal strategy the position in this list
/// is what reaches the database.
///
/// ```rust
/// use sql_pipeline::prelude::*;
/// use sql_pipeline::impl_sql_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Status { Active, Retired }
///
/// impl_sql_enum!(Status { Active, Retired });
///
/// assert_eq!(Status::from_value(Status::Retired.into_value())?, Status::Retired);
/// # Ok::<(), SqlPipelineError>(())
/// ```
#[macro_export]
macro_rules! impl_sql_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::typed::SqlTyped for $ty {
            fn sql_type() -> $crate::types::SqlType {
                $crate::types::SqlType::Enum($crate::types::EnumType::new(
                    stringify!($ty),
                    &[$(stringify!($variant)),+],
                ))
            }

            fn into_value(self) -> $crate::types::Value {
                let name = match self {
                    $($ty::$variant => stringify!($variant),)+
                };
                let $crate::types::SqlType::Enum(ty) = Self::sql_type() else {
                    return $crate::types::Value::Null;
                };
                $crate::typed::enum_value(ty, name)
            }

            fn from_value(
                value: $crate::types::Value,
            ) -> Result<Self, $crate::error::SqlPipelineError> {
                let $crate::types::SqlType::Enum(ty) = Self::sql_type() else {
                    return Err($crate::error::SqlPipelineError::NoMapper(Self::sql_type()));
                };
                match $crate::typed::enum_name(value, ty)? {
                    $(stringify!($variant) => Ok($ty::$variant),)+
                    other => Err($crate::error::SqlPipelineError::ConversionError(format!(
                        "{other} is not a variant of {}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

/// Implement [`SqlTyped`](crate::typed::SqlTyped) for an opaque type carried as a custom value.
///
/// Binding such a value needs an argument factory for `SqlType::Custom(name)`; reading one needs
/// a column or row mapper factory for the same type.
#[macro_export]
macro_rules! impl_sql_custom {
    ($ty:ty, $name:literal) => {
        impl $crate::typed::SqlTyped for $ty {
            fn sql_type() -> $crate::types::SqlType {
                $crate::types::SqlType::Custom($name)
            }

            fn into_value(self) -> $crate::types::Value {
                $crate::types::Value::Custom($crate::types::CustomValue::new($name, self))
            }

            fn from_value(
                value: $crate::types::Value,
            ) -> Result<Self, $crate::error::SqlPipelineError> {
                $crate::typed::custom_from_value::<Self>(value, $name)
            }
        }
    };
}
