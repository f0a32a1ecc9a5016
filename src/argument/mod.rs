use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{EngineConfig, EnumStrategy};
use crate::driver::NativeStatement;
use crate::error::SqlPipelineError;
use crate::types::{RowValues, SqlType, Value};

mod builtin;

pub use builtin::builtin_factories;

/// Writes one value into one native parameter slot.
pub trait Encoder: fmt::Debug + Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the driver rejects the bind.
    fn apply(&self, position: usize, stmt: &mut dyn NativeStatement)
    -> Result<(), SqlPipelineError>;
}

/// Encoder for an already-converted driver value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEncoder(pub RowValues);

impl Encoder for ValueEncoder {
    fn apply(
        &self,
        position: usize,
        stmt: &mut dyn NativeStatement,
    ) -> Result<(), SqlPipelineError> {
        stmt.bind(position, self.0.clone())
    }
}

/// Binds SQL NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullEncoder;

impl Encoder for NullEncoder {
    fn apply(
        &self,
        position: usize,
        stmt: &mut dyn NativeStatement,
    ) -> Result<(), SqlPipelineError> {
        stmt.bind(position, RowValues::Null)
    }
}

/// Candidate strategy for turning a value of some declared type into an [`Encoder`].
pub trait ArgumentFactory: Send + Sync {
    /// Produce an encoder when this factory accepts `declared` and `value`; `Ok(None)` declines.
    ///
    /// `registry` is the registry performing the resolution, for factories that unwrap a value
    /// and resolve the inner one.
    ///
    /// # Errors
    ///
    /// Returns an error when the factory accepts the value but cannot convert it.
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError>;
}

type ConvertFn = dyn Fn(&Value) -> Result<RowValues, SqlPipelineError> + Send + Sync;

/// Factory for one declared type, backed by a conversion closure.
///
/// Also accepts custom values of that type when they are bound undeclared.
///
/// ```rust
/// use sql_pipeline::prelude::*;
///
/// let registry = ArgumentRegistry::new(&EngineConfig::default());
/// registry.register(FnArgumentFactory::new(SqlType::Custom("Celsius"), |v| match v {
///     Value::Float(f) => Ok(RowValues::Float(*f)),
///     other => Err(SqlPipelineError::ConversionError(format!("not a temperature: {other:?}"))),
/// }));
/// assert!(registry.resolve(&SqlType::Custom("Celsius"), &Value::Float(21.5)).is_ok());
/// ```
pub struct FnArgumentFactory {
    declared: SqlType,
    convert: Box<ConvertFn>,
}

impl FnArgumentFactory {
    pub fn new<F>(declared: SqlType, convert: F) -> Self
    where
        F: Fn(&Value) -> Result<RowValues, SqlPipelineError> + Send + Sync + 'static,
    {
        Self {
            declared,
            convert: Box::new(convert),
        }
    }

    fn accepts(&self, declared: &SqlType, value: &Value) -> bool {
        if *declared == self.declared {
            return true;
        }
        match (declared, &self.declared, value) {
            (SqlType::Any, SqlType::Custom(name), Value::Custom(custom)) => {
                custom.type_name() == *name
            }
            _ => false,
        }
    }
}

impl ArgumentFactory for FnArgumentFactory {
    fn build(
        &self,
        declared: &SqlType,
        value: &Value,
        _registry: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        if !self.accepts(declared, value) {
            return Ok(None);
        }
        let encoder: Arc<dyn Encoder> = Arc::new(ValueEncoder((self.convert)(value)?));
        Ok(Some(encoder))
    }
}

type FactoryList = Arc<Vec<Arc<dyn ArgumentFactory>>>;

/// Ordered chain of argument factories, most recently registered first.
///
/// The list is copy-on-write: resolution works on a snapshot, so concurrent `register` calls
/// never disturb a resolution already in flight.
pub struct ArgumentRegistry {
    factories: RwLock<FactoryList>,
    enum_strategy: EnumStrategy,
    bind_null_to_primitives: bool,
}

impl fmt::Debug for ArgumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentRegistry")
            .field("factories", &self.len())
            .field("enum_strategy", &self.enum_strategy)
            .field("bind_null_to_primitives", &self.bind_null_to_primitives)
            .finish()
    }
}

impl ArgumentRegistry {
    /// Registry holding the built-in factories.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let registry = Self::empty(config);
        for factory in builtin_factories() {
            registry.register_arc(factory);
        }
        registry
    }

    /// Registry with no factories at all.
    #[must_use]
    pub fn empty(config: &EngineConfig) -> Self {
        Self {
            factories: RwLock::new(Arc::new(Vec::new())),
            enum_strategy: config.enum_strategy,
            bind_null_to_primitives: config.bind_null_to_primitives,
        }
    }

    /// Put `factory` at the front of the chain.
    pub fn register<F: ArgumentFactory + 'static>(&self, factory: F) {
        self.register_arc(Arc::new(factory));
    }

    pub fn register_arc(&self, factory: Arc<dyn ArgumentFactory>) {
        let mut guard = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).insert(0, factory);
    }

    /// Independent copy sharing the current factory instances; later registrations on either
    /// side are invisible to the other.
    #[must_use]
    pub fn fork_child(&self) -> Self {
        Self {
            factories: RwLock::new(self.snapshot()),
            enum_strategy: self.enum_strategy,
            bind_null_to_primitives: self.bind_null_to_primitives,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    #[must_use]
    pub fn enum_strategy(&self) -> EnumStrategy {
        self.enum_strategy
    }

    #[must_use]
    pub fn bind_null_to_primitives(&self) -> bool {
        self.bind_null_to_primitives
    }

    fn snapshot(&self) -> FactoryList {
        Arc::clone(
            &self
                .factories
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Pick an encoder for `value` declared as `declared`.
    ///
    /// The first factory accepting the exact declared type wins. If none does, the chain is
    /// walked again with `SqlType::Any` as the declared type.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::UnbindableValue` when no factory accepts the value in either
    /// pass, or the error raised by the accepting factory.
    pub fn resolve(
        &self,
        declared: &SqlType,
        value: &Value,
    ) -> Result<Arc<dyn Encoder>, SqlPipelineError> {
        let factories = self.snapshot();
        for factory in factories.iter() {
            if let Some(encoder) = factory.build(declared, value, self)? {
                return Ok(encoder);
            }
        }
        if *declared != SqlType::Any {
            for factory in factories.iter() {
                if let Some(encoder) = factory.build(&SqlType::Any, value, self)? {
                    return Ok(encoder);
                }
            }
        }
        Err(SqlPipelineError::UnbindableValue(declared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingStatement;
    use crate::types::{EnumType, EnumValue};

    const SUIT: EnumType = EnumType::new("Suit", &["Hearts", "Spades"]);

    fn encode(registry: &ArgumentRegistry, declared: &SqlType, value: Value) -> RowValues {
        let encoder = registry.resolve(declared, &value).unwrap();
        let mut stmt = RecordingStatement::default();
        encoder.apply(1, &mut stmt).unwrap();
        stmt.bound(1).cloned().unwrap()
    }

    fn constant(tag: &'static str) -> FnArgumentFactory {
        FnArgumentFactory::new(SqlType::Text, move |_| Ok(RowValues::Text(tag.into())))
    }

    #[test]
    fn most_recent_registration_wins() {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        registry.register(constant("first"));
        registry.register(constant("second"));
        let out = encode(&registry, &SqlType::Text, Value::Text("x".into()));
        assert_eq!(out, RowValues::Text("second".into()));
    }

    #[test]
    fn fork_is_isolated_from_parent() {
        let parent = ArgumentRegistry::new(&EngineConfig::default());
        let child = parent.fork_child();
        child.register(constant("child"));
        assert_eq!(child.len(), parent.len() + 1);
        assert_eq!(
            encode(&parent, &SqlType::Text, Value::Text("x".into())),
            RowValues::Text("x".into())
        );

        parent.register(constant("parent"));
        assert_eq!(
            encode(&child, &SqlType::Text, Value::Text("x".into())),
            RowValues::Text("child".into())
        );
    }

    #[test]
    fn falls_back_to_any_for_unknown_declared_type() {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        let out = encode(&registry, &SqlType::Custom("Money"), Value::Int(12));
        assert_eq!(out, RowValues::Int(12));
    }

    #[test]
    fn nothing_accepts_custom_value() {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        let value = Value::Custom(crate::types::CustomValue::new("Point", (1, 2)));
        let err = registry
            .resolve(&SqlType::Custom("Point"), &value)
            .unwrap_err();
        assert!(matches!(err, SqlPipelineError::UnbindableValue(SqlType::Custom("Point"))));
    }

    #[test]
    fn enums_follow_strategy() {
        let value = Value::Enum(EnumValue::new(SUIT, 1).unwrap());
        let by_name = ArgumentRegistry::new(&EngineConfig::default());
        assert_eq!(
            encode(&by_name, &SqlType::Enum(SUIT), value.clone()),
            RowValues::Text("Spades".into())
        );

        let cfg = EngineConfig {
            enum_strategy: EnumStrategy::ByOrdinal,
            ..EngineConfig::default()
        };
        let by_ordinal = ArgumentRegistry::new(&cfg);
        assert_eq!(
            encode(&by_ordinal, &SqlType::Enum(SUIT), value),
            RowValues::Int(1)
        );
    }

    #[test]
    fn optional_unwraps_to_inner_type() {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        let declared = SqlType::optional(SqlType::I32);
        assert_eq!(
            encode(
                &registry,
                &declared,
                Value::Optional(Some(Box::new(Value::Int(5))))
            ),
            RowValues::Int(5)
        );
        assert_eq!(
            encode(&registry, &declared, Value::Optional(None)),
            RowValues::Null
        );
    }

    #[test]
    fn null_primitives_follow_config() {
        let lenient = ArgumentRegistry::new(&EngineConfig::default());
        assert_eq!(encode(&lenient, &SqlType::I64, Value::Null), RowValues::Null);

        let cfg = EngineConfig {
            bind_null_to_primitives: false,
            ..EngineConfig::default()
        };
        let strict = ArgumentRegistry::new(&cfg);
        assert!(strict.resolve(&SqlType::I64, &Value::Null).is_err());
        assert!(
            strict
                .resolve(&SqlType::optional(SqlType::I64), &Value::Optional(None))
                .is_ok()
        );
    }

    #[test]
    fn integers_are_range_checked() {
        let registry = ArgumentRegistry::new(&EngineConfig::default());
        let err = registry.resolve(&SqlType::I8, &Value::Int(300)).unwrap_err();
        assert!(matches!(err, SqlPipelineError::ConversionError(_)));
        assert_eq!(encode(&registry, &SqlType::I8, Value::Int(-5)), RowValues::Int(-5));
    }
}
