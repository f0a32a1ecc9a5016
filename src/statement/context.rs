use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::cleanup::{Cleanable, CleanupChain, StatementCleanable};
use crate::driver::NativeStatement;
use crate::error::SqlPipelineError;
use crate::translation::{Attributes, RewritePlan};
use crate::types::Value;

/// State of one statement execution: what ran, with which attributes, and what must be
/// released afterwards.
pub struct StatementContext {
    template: String,
    attributes: Attributes,
    plan: Option<Arc<RewritePlan>>,
    chain: CleanupChain,
    closed: bool,
}

impl fmt::Debug for StatementContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementContext")
            .field("template", &self.template)
            .field("sql", &self.plan.as_ref().map(|plan| plan.sql()))
            .field("chain", &self.chain)
            .field("closed", &self.closed)
            .finish()
    }
}

impl StatementContext {
    pub(crate) fn new(template: String, attributes: Attributes) -> Self {
        Self {
            template,
            attributes,
            plan: None,
            chain: CleanupChain::new(),
            closed: false,
        }
    }

    /// Template text as handed to the statement, before defines are rendered.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Rewritten statement, once rewriting succeeded.
    #[must_use]
    pub fn plan(&self) -> Option<&RewritePlan> {
        self.plan.as_deref()
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_plan(&mut self, plan: Arc<RewritePlan>) {
        self.plan = Some(plan);
    }

    pub(crate) fn track<C: Cleanable + 'static>(&mut self, cleanable: C) {
        self.chain.track(cleanable);
    }

    pub(crate) fn track_statement(&mut self, stmt: Box<dyn NativeStatement>) {
        self.chain.track(StatementCleanable(stmt));
    }

    /// Release everything acquired for this execution. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the failure(s) raised by the cleanup chain.
    pub fn close(&mut self) -> Result<(), SqlPipelineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        trace!(template = %self.template, tracked = self.chain.len(), "closing statement");
        self.chain.cleanup()
    }
}
