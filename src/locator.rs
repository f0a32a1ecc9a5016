use std::collections::HashMap;

use crate::error::SqlPipelineError;
use crate::translation::Attributes;

/// Finds template text by name.
pub trait TemplateLocator: Send + Sync {
    /// # Errors
    ///
    /// Returns `SqlPipelineError::TemplateNotFound` when nothing is known under `name`.
    fn locate(&self, name: &str, attributes: &Attributes) -> Result<String, SqlPipelineError>;
}

impl<F> TemplateLocator for F
where
    F: Fn(&str, &Attributes) -> Result<String, SqlPipelineError> + Send + Sync,
{
    fn locate(&self, name: &str, attributes: &Attributes) -> Result<String, SqlPipelineError> {
        self(name, attributes)
    }
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MapTemplateLocator {
    templates: HashMap<String, String>,
}

impl MapTemplateLocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.insert(name, sql);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        self.templates.insert(name.into(), sql.into());
    }
}

impl TemplateLocator for MapTemplateLocator {
    fn locate(&self, name: &str, _attributes: &Attributes) -> Result<String, SqlPipelineError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| SqlPipelineError::TemplateNotFound(name.to_string()))
    }
}
