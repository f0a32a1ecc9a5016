//! Declared field tables for plain structs.
//!
//! A [`StructDescriptor`] lists a struct's fields with their declared types plus accessors. From
//! it come a row-mapper factory (columns matched to fields ignoring case and underscores) and a
//! named-argument finder exposing an instance's fields to `:name` markers.

use std::fmt;
use std::sync::Arc;

use crate::argument::{ArgumentRegistry, Encoder};
use crate::binding::NamedArgumentFinder;
use crate::error::SqlPipelineError;
use crate::mapper::{ColumnMapper, MappingRegistry, RowMapper, RowMapperFactory};
use crate::results::DbRow;
use crate::typed::SqlTyped;
use crate::types::{CustomValue, SqlType, Value};

type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<(), SqlPipelineError> + Send + Sync>;

struct FieldDescriptor<T> {
    name: &'static str,
    declared: SqlType,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            declared: self.declared.clone(),
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Field table for `T`, registered under `SqlType::Custom(name)`.
///
/// ```rust
/// use sql_pipeline::prelude::*;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct User { id: i64, user_name: String }
///
/// let users = StructDescriptor::<User>::new("User")
///     .field("id", |u: &User| u.id, |u: &mut User, v| u.id = v)
///     .field("user_name", |u: &User| u.user_name.clone(), |u: &mut User, v| u.user_name = v);
/// assert_eq!(users.sql_type(), SqlType::Custom("User"));
/// ```
pub struct StructDescriptor<T> {
    name: &'static str,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T> Clone for StructDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            fields: self.fields.clone(),
        }
    }
}

impl<T> fmt::Debug for StructDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<_> = self
            .fields
            .iter()
            .map(|field| (field.name, field.declared.to_string()))
            .collect();
        f.debug_struct("StructDescriptor")
            .field("name", &self.name)
            .field("fields", &fields)
            .finish()
    }
}

impl<T: Default + Send + Sync + 'static> StructDescriptor<T> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Add a field whose declared type comes from `F`.
    #[must_use]
    pub fn field<F, G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        F: SqlTyped + 'static,
        G: Fn(&T) -> F + Send + Sync + 'static,
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        self.fields.push(FieldDescriptor {
            name,
            declared: F::sql_type(),
            get: Arc::new(move |target: &T| get(target).into_value()),
            set: Arc::new(
                move |target: &mut T, value: Value| -> Result<(), SqlPipelineError> {
                    set(target, F::from_value(value)?);
                    Ok(())
                },
            ),
        });
        self
    }

    #[must_use]
    pub fn sql_type(&self) -> SqlType {
        SqlType::Custom(self.name)
    }

    /// Row-mapper factory producing `T` for this descriptor's type.
    #[must_use]
    pub fn row_mapper_factory(&self) -> StructRowMapperFactory<T> {
        StructRowMapperFactory {
            descriptor: self.clone(),
        }
    }

    /// Finder answering `:field` markers from `value`.
    #[must_use]
    pub fn finder(&self, value: T) -> StructFinder<T> {
        StructFinder {
            prefix: None,
            value,
            descriptor: self.clone(),
        }
    }

    /// Finder answering `:prefix.field` markers from `value`.
    #[must_use]
    pub fn finder_prefixed(&self, prefix: impl Into<String>, value: T) -> StructFinder<T> {
        StructFinder {
            prefix: Some(prefix.into()),
            value,
            descriptor: self.clone(),
        }
    }
}

pub struct StructRowMapperFactory<T> {
    descriptor: StructDescriptor<T>,
}

impl<T: Default + Send + Sync + 'static> RowMapperFactory for StructRowMapperFactory<T> {
    fn build(
        &self,
        ty: &SqlType,
        registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn RowMapper>>, SqlPipelineError> {
        if *ty != self.descriptor.sql_type() {
            return Ok(None);
        }
        let mut fields = Vec::with_capacity(self.descriptor.fields.len());
        for field in &self.descriptor.fields {
            let column = registry.resolve_column(&field.declared)?;
            fields.push((normalize(field.name), field.clone(), column));
        }
        let mapper: Arc<dyn RowMapper> = Arc::new(StructRowMapper {
            name: self.descriptor.name,
            fields,
        });
        Ok(Some(mapper))
    }
}

struct StructRowMapper<T> {
    name: &'static str,
    fields: Vec<(String, FieldDescriptor<T>, Arc<dyn ColumnMapper>)>,
}

impl<T: Default + Send + Sync + 'static> RowMapper for StructRowMapper<T> {
    fn map(&self, row: &DbRow) -> Result<Value, SqlPipelineError> {
        let mut target = T::default();
        let mut matched = 0;
        for (index, column_name) in row.column_names.iter().enumerate() {
            let key = normalize(column_name);
            if let Some((_, field, mapper)) = self.fields.iter().find(|(n, _, _)| *n == key) {
                (field.set)(&mut target, mapper.map(row, index)?)?;
                matched += 1;
            }
        }
        if matched == 0 && !self.fields.is_empty() {
            return Err(SqlPipelineError::ConversionError(format!(
                "no column of the result matches a field of {}",
                self.name
            )));
        }
        Ok(Value::Custom(CustomValue::new(self.name, target)))
    }
}

pub struct StructFinder<T> {
    prefix: Option<String>,
    value: T,
    descriptor: StructDescriptor<T>,
}

impl<T> NamedArgumentFinder for StructFinder<T> {
    fn find(
        &self,
        name: &str,
        args: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        let field_name = match &self.prefix {
            Some(prefix) => match name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
            {
                Some(rest) => rest,
                None => return Ok(None),
            },
            None => name,
        };
        self.descriptor
            .fields
            .iter()
            .find(|field| field.name == field_name)
            .map(|field| args.resolve(&field.declared, &(field.get)(&self.value)))
            .transpose()
    }

    fn names(&self) -> Vec<String> {
        self.descriptor
            .fields
            .iter()
            .map(|field| match &self.prefix {
                Some(prefix) => format!("{prefix}.{}", field.name),
                None => field.name.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::test_utils::RecordingStatement;
    use crate::types::RowValues;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        id: i64,
        owner_name: String,
        balance: Option<f64>,
    }

    fn accounts() -> StructDescriptor<Account> {
        StructDescriptor::new("Account")
            .field("id", |a: &Account| a.id, |a: &mut Account, v| a.id = v)
            .field(
                "owner_name",
                |a: &Account| a.owner_name.clone(),
                |a: &mut Account, v| a.owner_name = v,
            )
            .field(
                "balance",
                |a: &Account| a.balance,
                |a: &mut Account, v| a.balance = v,
            )
    }

    #[test]
    fn columns_match_fields_loosely() {
        let registry = MappingRegistry::new(&EngineConfig::default());
        registry.register_row(accounts().row_mapper_factory());
        let mapper = registry.resolve_row(&SqlType::Custom("Account")).unwrap();
        let row = DbRow::new(
            Arc::new(vec!["ID".into(), "ownerName".into(), "extra".into()]),
            vec![
                RowValues::Int(7),
                RowValues::Text("ana".into()),
                RowValues::Int(0),
            ],
        );
        let Value::Custom(custom) = mapper.map(&row).unwrap() else {
            panic!("expected a custom value");
        };
        assert_eq!(
            custom.downcast_ref::<Account>(),
            Some(&Account {
                id: 7,
                owner_name: "ana".into(),
                balance: None,
            })
        );
    }

    #[test]
    fn unmatched_row_is_an_error() {
        let registry = MappingRegistry::new(&EngineConfig::default());
        registry.register_row(accounts().row_mapper_factory());
        let mapper = registry.resolve_row(&SqlType::Custom("Account")).unwrap();
        let row = DbRow::new(Arc::new(vec!["nope".into()]), vec![RowValues::Int(1)]);
        assert!(mapper.map(&row).is_err());
    }

    #[test]
    fn finder_exposes_fields() {
        let args = ArgumentRegistry::new(&EngineConfig::default());
        let account = Account {
            id: 3,
            owner_name: "bo".into(),
            balance: None,
        };
        let finder = accounts().finder_prefixed("acct", account.clone());
        let encoder = finder.find("acct.owner_name", &args).unwrap().unwrap();
        let mut stmt = RecordingStatement::default();
        encoder.apply(1, &mut stmt).unwrap();
        assert_eq!(stmt.bound(1), Some(&RowValues::Text("bo".into())));

        let balance = finder.find("acct.balance", &args).unwrap().unwrap();
        balance.apply(2, &mut stmt).unwrap();
        assert_eq!(stmt.bound(2), Some(&RowValues::Null));

        assert!(finder.find("owner_name", &args).unwrap().is_none());
        assert!(accounts().finder(account).find("id", &args).unwrap().is_some());
    }
}
