use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::argument::{ArgumentRegistry, Encoder};
use crate::error::SqlPipelineError;

mod finders;

pub use finders::MapFinder;

/// Delegate consulted for named arguments that were not bound directly.
pub trait NamedArgumentFinder {
    /// Encoder for `name`, or `None` when this finder has nothing under that name.
    ///
    /// # Errors
    ///
    /// Returns an error when the finder has a value for `name` but it cannot be encoded.
    fn find(
        &self,
        name: &str,
        args: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError>;

    /// Names this finder can answer, for diagnostics.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Arguments collected for one statement execution.
#[derive(Default)]
pub struct Binding {
    positional: BTreeMap<usize, Arc<dyn Encoder>>,
    named: HashMap<String, Arc<dyn Encoder>>,
    finders: Vec<Box<dyn NamedArgumentFinder>>,
}

impl Binding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the zero-based `position`; rebinding replaces the earlier encoder.
    pub fn bind_positional(&mut self, position: usize, encoder: Arc<dyn Encoder>) {
        self.positional.insert(position, encoder);
    }

    /// Bind `name`; rebinding replaces the earlier encoder.
    pub fn bind_named(&mut self, name: impl Into<String>, encoder: Arc<dyn Encoder>) {
        self.named.insert(name.into(), encoder);
    }

    pub fn add_finder(&mut self, finder: Box<dyn NamedArgumentFinder>) {
        self.finders.push(finder);
    }

    /// Look `name` up among direct bindings, then in each finder in registration order.
    ///
    /// # Errors
    ///
    /// Propagates a finder's encoding failure.
    pub fn find_for_name(
        &self,
        name: &str,
        args: &ArgumentRegistry,
    ) -> Result<Option<Arc<dyn Encoder>>, SqlPipelineError> {
        if let Some(encoder) = self.named.get(name) {
            return Ok(Some(Arc::clone(encoder)));
        }
        for finder in &self.finders {
            if let Some(encoder) = finder.find(name, args)? {
                return Ok(Some(encoder));
            }
        }
        Ok(None)
    }

    #[must_use]
    pub fn find_for_position(&self, position: usize) -> Option<Arc<dyn Encoder>> {
        self.positional.get(&position).cloned()
    }

    #[must_use]
    pub fn has_named(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn named_names(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.positional.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty() && self.finders.is_empty()
    }

    pub fn clear(&mut self) {
        self.positional.clear();
        self.named.clear();
        self.finders.clear();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut named: Vec<_> = self.named.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        let finders: Vec<Vec<String>> = self.finders.iter().map(|f| f.names()).collect();
        f.debug_struct("Binding")
            .field("positional", &self.positional)
            .field("named", &named)
            .field("finders", &finders)
            .finish()
    }
}
