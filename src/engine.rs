use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::argument::{ArgumentFactory, ArgumentRegistry};
use crate::config::EngineConfig;
use crate::driver::Session;
use crate::error::SqlPipelineError;
use crate::handle::Handle;
use crate::locator::TemplateLocator;
use crate::mapper::{ColumnMapperFactory, MappingRegistry, RowMapperFactory};
use crate::translation::SqlRewriter;

/// Root scope: configuration, root registries, the shared template cache and an optional
/// template locator.
///
/// An engine is `Send + Sync`; share it behind an `Arc` and open one [`Handle`] per session.
///
/// ```rust
/// use sql_pipeline::prelude::*;
/// use sql_pipeline::sqlite::SqliteSession;
///
/// let engine = Engine::new(EngineConfig::default())?
///     .with_locator(MapTemplateLocator::new().with_template("answer", "select 42 as n"));
/// let handle = engine.open(SqliteSession::open_in_memory()?);
/// let n: i64 = handle.query_named("answer")?.select_as::<i64>()?.one()?;
/// assert_eq!(n, 42);
/// # Ok::<(), SqlPipelineError>(())
/// ```
pub struct Engine {
    config: EngineConfig,
    args: ArgumentRegistry,
    mappers: MappingRegistry,
    rewriter: Arc<SqlRewriter>,
    locator: Option<Arc<dyn TemplateLocator>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("args", &self.args)
            .field("mappers", &self.mappers)
            .field("rewriter", &self.rewriter)
            .field("locator", &self.locator.is_some())
            .finish()
    }
}

impl Engine {
    /// # Errors
    ///
    /// Returns `SqlPipelineError::ConfigError` if `config` fails validation.
    pub fn new(config: EngineConfig) -> Result<Self, SqlPipelineError> {
        config.validate()?;
        debug!(?config, "creating engine");
        Ok(Self {
            args: ArgumentRegistry::new(&config),
            mappers: MappingRegistry::new(&config),
            rewriter: Arc::new(SqlRewriter::new(
                config.placeholder_style,
                config.template_cache_capacity,
            )),
            locator: None,
            config,
        })
    }

    #[must_use]
    pub fn with_locator<L: TemplateLocator + 'static>(mut self, locator: L) -> Self {
        self.locator = Some(Arc::new(locator));
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
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
    pub fn rewriter(&self) -> &SqlRewriter {
        &self.rewriter
    }

    /// Register for every handle opened afterwards.
    pub fn register_argument<F: ArgumentFactory + 'static>(&self, factory: F) {
        self.args.register(factory);
    }

    pub fn register_row_mapper<F: RowMapperFactory + 'static>(&self, factory: F) {
        self.mappers.register_row(factory);
    }

    pub fn register_column_mapper<F: ColumnMapperFactory + 'static>(&self, factory: F) {
        self.mappers.register_column(factory);
    }

    /// Wrap `session` in a handle holding forks of the root registries.
    #[must_use]
    pub fn open<S: Session + 'static>(&self, session: S) -> Handle {
        Handle::new(
            Rc::new(session),
            self.config.clone(),
            self.args.fork_child(),
            self.mappers.fork_child(),
            Arc::clone(&self.rewriter),
            self.locator.clone(),
        )
    }

    /// Open a handle over a `SQLite` database file.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::SqliteError` if the file cannot be opened.
    #[cfg(feature = "sqlite")]
    pub fn open_sqlite(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Handle, SqlPipelineError> {
        Ok(self.open(crate::sqlite::SqliteSession::open(path)?))
    }
}
