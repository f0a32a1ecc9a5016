use std::collections::HashMap;
use std::sync::Arc;

use crate::argument::{ArgumentRegistry, Encoder};
use crate::error::SqlPipelineError;
use crate::types::{SqlType, Value};

use super::NamedArgumentFinder;

/// Finder over the entries of a map, each resolved with no declared type.
#[derive(Debug, Clone, Default)]
pub struct MapFinder {
    entries: HashMap<String, Value>,
}

impl MapFinder {
    #[must_use]
    pub fn new(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl NamedArgumentFinder for MapFinder {
    fn find(
        &self,
        name: &str,
        args: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        self.entries
            .get(name)
            .map(|value| args.resolve(&SqlType::Any, value))
            .transpose()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}
