use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlPipelineError;
use crate::translation::PlaceholderStyle;

/// How enumerations travel to and from the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EnumStrategy {
    /// Bind and decode by variant name (decoding falls back to a case-insensitive match).
    #[default]
    ByName,
    /// Bind and decode by zero-based ordinal.
    ByOrdinal,
}

/// Engine-wide settings, copied into every handle and statement scope.
///
/// Loadable from JSON:
/// ```rust
/// use sql_pipeline::prelude::*;
///
/// let cfg = EngineConfig::from_json(r#"{ "placeholder_style": "postgres" }"#).unwrap();
/// assert_eq!(cfg.placeholder_style, PlaceholderStyle::Postgres);
/// assert!(cfg.coalesce_null_primitives);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub placeholder_style: PlaceholderStyle,
    pub enum_strategy: EnumStrategy,
    /// Map NULL columns into primitives as the type's default instead of failing.
    pub coalesce_null_primitives: bool,
    /// Accept NULL for arguments declared with a primitive type.
    pub bind_null_to_primitives: bool,
    /// Skip the check that every bound argument is consumed by some slot.
    pub allow_unused_bindings: bool,
    /// Upper bound on cached rewritten templates.
    pub template_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholder_style: PlaceholderStyle::Question,
            enum_strategy: EnumStrategy::ByName,
            coalesce_null_primitives: true,
            bind_null_to_primitives: true,
            allow_unused_bindings: false,
            template_cache_capacity: 1000,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse a JSON document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::ConfigError` if the document is not valid JSON for this shape
    /// or fails validation.
    pub fn from_json(json: &str) -> Result<Self, SqlPipelineError> {
        let cfg: EngineConfig = serde_json::from_str(json)
            .map_err(|e| SqlPipelineError::ConfigError(format!("invalid engine config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns `SqlPipelineError::ConfigError` when the template cache capacity is zero.
    pub fn validate(&self) -> Result<(), SqlPipelineError> {
        if self.template_cache_capacity == 0 {
            return Err(SqlPipelineError::ConfigError(
                "template_cache_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cfg: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cfg: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn placeholder_style(mut self, style: PlaceholderStyle) -> Self {
        self.cfg.placeholder_style = style;
        self
    }

    #[must_use]
    pub fn enum_strategy(mut self, strategy: EnumStrategy) -> Self {
        self.cfg.enum_strategy = strategy;
        self
    }

    #[must_use]
    pub fn coalesce_null_primitives(mut self, coalesce: bool) -> Self {
        self.cfg.coalesce_null_primitives = coalesce;
        self
    }

    #[must_use]
    pub fn bind_null_to_primitives(mut self, permitted: bool) -> Self {
        self.cfg.bind_null_to_primitives = permitted;
        self
    }

    #[must_use]
    pub fn allow_unused_bindings(mut self, allow: bool) -> Self {
        self.cfg.allow_unused_bindings = allow;
        self
    }

    #[must_use]
    pub fn template_cache_capacity(mut self, capacity: usize) -> Self {
        self.cfg.template_cache_capacity = capacity;
        self
    }

    /// # Errors
    ///
    /// Returns `SqlPipelineError::ConfigError` if the assembled config fails validation.
    pub fn finish(self) -> Result<EngineConfig, SqlPipelineError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
