use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::argument::{ArgumentFactory, ArgumentRegistry};
use crate::config::EngineConfig;
use crate::driver::Session;
use crate::error::SqlPipelineError;
use crate::locator::TemplateLocator;
use crate::mapper::{ColumnMapperFactory, MappingRegistry, RowMapperFactory};
use crate::statement::{Batch, Statement};
use crate::translation::{Attributes, SqlRewriter};
use crate::typed::SqlTyped;

/// One open session plus its own forks of the engine's registries.
///
/// Registrations and defines made here are seen by every statement created from this handle,
/// and by nothing else.
pub struct Handle {
    session: Rc<dyn Session>,
    config: EngineConfig,
    args: ArgumentRegistry,
    mappers: MappingRegistry,
    rewriter: Arc<SqlRewriter>,
    locator: Option<Arc<dyn TemplateLocator>>,
    attributes: Attributes,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("closed", &self.session.is_closed())
            .field("in_transaction", &self.session.is_in_transaction())
            .field("args", &self.args)
            .field("mappers", &self.mappers)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl Handle {
    pub(crate) fn new(
        session: Rc<dyn Session>,
        config: EngineConfig,
        args: ArgumentRegistry,
        mappers: MappingRegistry,
        rewriter: Arc<SqlRewriter>,
        locator: Option<Arc<dyn TemplateLocator>>,
    ) -> Self {
        Self {
            session,
            config,
            args,
            mappers,
            rewriter,
            locator,
            attributes: Attributes::new(),
        }
    }

    /// Start a statement from template text.
    #[must_use]
    pub fn query(&self, template: &str) -> Statement<'_> {
        Statement::new(self, template.to_string())
    }

    /// Start a statement from a template found by the engine's locator.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::TemplateNotFound` when no locator is configured or it does not
    /// know `name`.
    pub fn query_named(&self, name: &str) -> Result<Statement<'_>, SqlPipelineError> {
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| SqlPipelineError::TemplateNotFound(name.to_string()))?;
        let template = locator.locate(name, &self.attributes)?;
        Ok(Statement::new(self, template))
    }

    /// Start a batch: `template` is prepared once and executed for every added part.
    #[must_use]
    pub fn prepare_batch(&self, template: &str) -> Batch<'_> {
        Batch::new(self, template.to_string())
    }

    /// Set a `<key>` attribute for every later statement of this handle.
    pub fn define<T: SqlTyped>(&mut self, key: &str, value: T) {
        self.attributes.insert(key.to_string(), value.into_value());
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn register_argument<F: ArgumentFactory + 'static>(&self, factory: F) {
        self.args.register(factory);
    }

    pub fn register_row_mapper<F: RowMapperFactory + 'static>(&self, factory: F) {
        self.mappers.register_row(factory);
    }

    pub fn register_column_mapper<F: ColumnMapperFactory + 'static>(&self, factory: F) {
        self.mappers.register_column(factory);
    }

    #[must_use]
    pub fn arguments(&self) -> &ArgumentRegistry {
        &self.args
    }

    #[must_use]
    pub fn mappers(&self) -> &MappingRegistry {
        &self.mappers
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn rewriter(&self) -> &SqlRewriter {
        &self.rewriter
    }

    pub(crate) fn session(&self) -> Rc<dyn Session> {
        Rc::clone(&self.session)
    }

    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.session.is_in_transaction()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// # Errors
    ///
    /// Returns an error if the session cannot start a transaction.
    pub fn begin(&self) -> Result<(), SqlPipelineError> {
        self.session.begin()
    }

    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(&self) -> Result<(), SqlPipelineError> {
        self.session.commit()
    }

    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub fn rollback(&self) -> Result<(), SqlPipelineError> {
        self.session.rollback()
    }

    /// Run `work` inside a transaction: commit when it succeeds, roll back when it fails.
    ///
    /// # Errors
    ///
    /// Returns the failure of `work` (with any rollback failure attached), or the begin or
    /// commit failure.
    pub fn in_transaction<R, F>(&self, work: F) -> Result<R, SqlPipelineError>
    where
        F: FnOnce(&Handle) -> Result<R, SqlPipelineError>,
    {
        self.begin()?;
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back failed transaction");
                Err(err.with_cleanup(self.rollback()))
            }
        }
    }

    /// Roll back anything left open, then release the session.
    ///
    /// # Errors
    ///
    /// Returns the rollback and close failures, aggregated when both occur.
    pub fn close(&self) -> Result<(), SqlPipelineError> {
        let mut failures = Vec::new();
        if self.session.is_in_transaction() {
            warn!("closing a handle with an open transaction; rolling back");
            if let Err(err) = self.session.rollback() {
                failures.push(err);
            }
        }
        if let Err(err) = self.session.close() {
            failures.push(err);
        }
        crate::error::CleanupFailure::aggregate(failures)
    }
}
