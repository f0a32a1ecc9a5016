//! Statement builder: collects arguments, then rewrites, prepares, binds and executes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::argument::{ArgumentFactory, ArgumentRegistry, Encoder};
use crate::binding::{Binding, MapFinder, NamedArgumentFinder};
use crate::cleanup::{HandleCleanable, HandleDisposition};
use crate::descriptor::StructDescriptor;
use crate::driver::Execution;
use crate::error::SqlPipelineError;
use crate::handle::Handle;
use crate::mapper::{ColumnMapperFactory, MappingRegistry, RowMapper, RowMapperFactory};
use crate::results::{DbRow, ResultIterator};
use crate::translation::Attributes;
use crate::typed::SqlTyped;
use crate::types::{SqlType, Value};

mod batch;
mod context;

pub use batch::Batch;
pub use context::StatementContext;

/// One statement execution in the making.
///
/// Values are turned into encoders as they are bound, using this statement's own fork of the
/// handle's argument registry. A value that cannot be encoded is reported by the terminal
/// operation, before anything is prepared.
///
/// ```rust
/// use sql_pipeline::prelude::*;
/// use sql_pipeline::sqlite::SqliteSession;
///
/// let engine = Engine::new(EngineConfig::default())?;
/// let handle = engine.open(SqliteSession::open_in_memory()?);
/// handle.query("create table t (id integer, name text)").dml()?;
/// handle
///     .query("insert into t values (:id, :name)")
///     .bind("id", 1_i64)
///     .bind("name", "ana".to_string())
///     .dml()?;
/// let names: Vec<String> = handle
///     .query("select name from t where id = ?")
///     .bind_at(0, 1_i64)
///     .select_as::<String>()?
///     .list()?;
/// assert_eq!(names, vec!["ana".to_string()]);
/// # Ok::<(), SqlPipelineError>(())
/// ```
pub struct Statement<'h> {
    handle: &'h Handle,
    template: String,
    binding: Binding,
    args: ArgumentRegistry,
    mappers: MappingRegistry,
    attributes: Attributes,
    cleanup_handle: Option<HandleDisposition>,
    pending: Option<SqlPipelineError>,
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("template", &self.template)
            .field("binding", &self.binding)
            .field("cleanup_handle", &self.cleanup_handle)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<'h> Statement<'h> {
    pub(crate) fn new(handle: &'h Handle, template: String) -> Self {
        Self {
            handle,
            template,
            binding: Binding::new(),
            args: handle.arguments().fork_child(),
            mappers: handle.mappers().fork_child(),
            attributes: handle.attributes().clone(),
            cleanup_handle: None,
            pending: None,
        }
    }

    fn defer(&mut self, outcome: Result<(), SqlPipelineError>) {
        if let Err(err) = outcome {
            self.pending.get_or_insert(err);
        }
    }

    /// Bind a typed value to `:name`.
    #[must_use]
    pub fn bind<T: SqlTyped>(self, name: &str, value: T) -> Self {
        self.bind_value(name, &T::sql_type(), value.into_value())
    }

    /// Bind a typed value to the zero-based `position`.
    #[must_use]
    pub fn bind_at<T: SqlTyped>(self, position: usize, value: T) -> Self {
        self.bind_value_at(position, &T::sql_type(), value.into_value())
    }

    /// Bind a loosely typed value to the zero-based `position` under an explicit declared type.
    #[must_use]
    pub fn bind_value_at(mut self, position: usize, declared: &SqlType, value: Value) -> Self {
        let outcome = self
            .args
            .resolve(declared, &value)
            .map(|encoder| self.binding.bind_positional(position, encoder));
        self.defer(outcome);
        self
    }

    /// Bind a loosely typed value to `:name` under an explicit declared type.
    #[must_use]
    pub fn bind_value(mut self, name: &str, declared: &SqlType, value: Value) -> Self {
        let outcome = self
            .args
            .resolve(declared, &value)
            .map(|encoder| self.binding.bind_named(name, encoder));
        self.defer(outcome);
        self
    }

    /// Bind a ready-made encoder to `:name`.
    #[must_use]
    pub fn bind_encoder(mut self, name: &str, encoder: Arc<dyn Encoder>) -> Self {
        self.binding.bind_named(name, encoder);
        self
    }

    /// Offer every entry of `values` to markers not bound directly.
    #[must_use]
    pub fn bind_map(self, values: HashMap<String, Value>) -> Self {
        self.add_finder(MapFinder::new(values))
    }

    /// Offer the fields of `value` to markers not bound directly.
    #[must_use]
    pub fn bind_struct<T>(self, descriptor: &StructDescriptor<T>, value: T) -> Self
    where
        T: Default + Send + Sync + 'static,
    {
        self.add_finder(descriptor.finder(value))
    }

    #[must_use]
    pub fn add_finder<F: NamedArgumentFinder + 'static>(mut self, finder: F) -> Self {
        self.binding.add_finder(Box::new(finder));
        self
    }

    /// Set a `<key>` attribute for this execution only.
    #[must_use]
    pub fn define<T: SqlTyped>(mut self, key: &str, value: T) -> Self {
        self.attributes.insert(key.to_string(), value.into_value());
        self
    }

    /// Register an argument factory visible to this statement only.
    #[must_use]
    pub fn register_argument<F: ArgumentFactory + 'static>(self, factory: F) -> Self {
        self.args.register(factory);
        self
    }

    #[must_use]
    pub fn register_row_mapper<F: RowMapperFactory + 'static>(self, factory: F) -> Self {
        self.mappers.register_row(factory);
        self
    }

    #[must_use]
    pub fn register_column_mapper<F: ColumnMapperFactory + 'static>(self, factory: F) -> Self {
        self.mappers.register_column(factory);
        self
    }

    /// Commit any open transaction and close the owning session when this statement is
    /// released.
    #[must_use]
    pub fn cleanup_handle_commit(mut self) -> Self {
        self.cleanup_handle = Some(HandleDisposition::Commit);
        self
    }

    /// Roll back any open transaction and close the owning session when this statement is
    /// released.
    #[must_use]
    pub fn cleanup_handle_rollback(mut self) -> Self {
        self.cleanup_handle = Some(HandleDisposition::Rollback);
        self
    }

    /// Execute and iterate the rows as [`DbRow`]s.
    ///
    /// # Errors
    ///
    /// Returns rewriting, binding, preparation or execution failures, and
    /// `SqlPipelineError::NoResults` when the statement produced no result set.
    pub fn select(self) -> Result<ResultIterator<DbRow>, SqlPipelineError> {
        self.select_as::<DbRow>()
    }

    /// Execute and map every row to `T` through the mapping registry.
    ///
    /// # Errors
    ///
    /// Same as [`Statement::select`], plus `SqlPipelineError::NoMapper` when nothing maps `T`.
    pub fn select_as<T: SqlTyped + 'static>(self) -> Result<ResultIterator<T>, SqlPipelineError> {
        let mapper = match self.mappers.resolve_row(&T::sql_type()) {
            Ok(mapper) => mapper,
            Err(err) => return Err(self.abandon(err)),
        };
        self.select_with(move |row: &DbRow| T::from_value(mapper.map(row)?))
    }

    /// Execute and map every row with `map`.
    ///
    /// # Errors
    ///
    /// Same as [`Statement::select`].
    pub fn select_with<T, F>(self, map: F) -> Result<ResultIterator<T>, SqlPipelineError>
    where
        T: 'static,
        F: Fn(&DbRow) -> Result<T, SqlPipelineError> + 'static,
    {
        let (execution, ctx) = self.execute()?;
        let cursor = match execution {
            Execution::Cursor(cursor) => Some(cursor),
            Execution::RowCount(_) => None,
        };
        ResultIterator::new(cursor, ctx, Box::new(map))
    }

    /// Execute and return the number of affected rows.
    ///
    /// A statement that produced a result set reports zero; its cursor is released unread.
    ///
    /// # Errors
    ///
    /// Returns rewriting, binding, preparation, execution or cleanup failures.
    pub fn dml(self) -> Result<usize, SqlPipelineError> {
        let (execution, mut ctx) = self.execute()?;
        let count = match execution {
            Execution::RowCount(count) => count,
            Execution::Cursor(mut cursor) => {
                ctx.track(move || cursor.close());
                0
            }
        };
        ctx.close()?;
        Ok(count)
    }

    /// Fail before execution, still honouring a requested handle cleanup.
    fn abandon(self, err: SqlPipelineError) -> SqlPipelineError {
        let mut ctx = self.context();
        err.with_cleanup(ctx.close())
    }

    fn context(&self) -> StatementContext {
        let mut ctx = StatementContext::new(self.template.clone(), self.attributes.clone());
        if let Some(disposition) = self.cleanup_handle {
            ctx.track(HandleCleanable::new(self.handle.session(), disposition));
        }
        ctx
    }

    fn execute(mut self) -> Result<(Execution, StatementContext), SqlPipelineError> {
        let mut ctx = self.context();
        if let Some(err) = self.pending.take() {
            return Err(err.with_cleanup(ctx.close()));
        }

        let plan = match self.handle.rewriter().rewrite(&self.template, &self.attributes) {
            Ok(plan) => plan,
            Err(err) => return Err(err.with_cleanup(ctx.close())),
        };
        ctx.set_plan(Arc::clone(&plan));
        debug!(template = %self.template, sql = %plan.sql(), "executing statement");

        let mut native = match self.handle.session().prepare(plan.sql()) {
            Ok(native) => native,
            Err(err) => return Err(err.with_cleanup(ctx.close())),
        };
        let allow_unused = self.handle.config().allow_unused_bindings;
        let outcome = plan
            .bind(&self.binding, &self.args, native.as_mut(), allow_unused)
            .and_then(|()| native.execute());
        ctx.track_statement(native);
        self.binding.clear();

        match outcome {
            Ok(execution) => Ok((execution, ctx)),
            Err(err) => Err(err.with_cleanup(ctx.close())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::mapper::FnRowMapperFactory;
    use crate::test_utils::ScriptedSession;
    use crate::types::{CustomValue, RowValues};

    fn open(session: &ScriptedSession) -> Handle {
        Engine::new(EngineConfig::default())
            .unwrap()
            .open(session.clone())
    }

    #[test]
    fn unbindable_value_fails_before_prepare() {
        let session = ScriptedSession::new();
        let handle = open(&session);
        let err = handle
            .query("select :p")
            .bind_value(
                "p",
                &SqlType::Custom("Point"),
                Value::Custom(CustomValue::new("Point", (1, 2))),
            )
            .dml()
            .unwrap_err();
        assert!(matches!(err, SqlPipelineError::UnbindableValue(_)));
        assert!(session.events().take().is_empty());
    }

    #[test]
    fn malformed_template_touches_nothing() {
        let session = ScriptedSession::new();
        let handle = open(&session);
        let err = handle.query("select 'open").dml().unwrap_err();
        assert!(matches!(err, SqlPipelineError::MalformedTemplate { .. }));
        assert!(session.events().take().is_empty());
    }

    #[test]
    fn execution_failure_still_closes_statement() {
        let session = ScriptedSession::new();
        session.push_failure("boom");
        let handle = open(&session);
        let err = handle.query("delete from t").dml().unwrap_err();
        assert!(matches!(err, SqlPipelineError::ExecutionError(ref m) if m == "boom"));
        assert_eq!(
            session.events().take(),
            vec!["prepare delete from t", "execute", "close statement"]
        );
    }

    #[test]
    fn cleanup_failure_rides_along() {
        let session = ScriptedSession::new();
        session.push_failure("boom");
        session.fail_statement_close();
        let handle = open(&session);
        let err = handle.query("delete from t").dml().unwrap_err();
        assert!(matches!(err.primary(), SqlPipelineError::ExecutionError(m) if m == "boom"));
        assert!(matches!(err, SqlPipelineError::WithCleanup { .. }));
    }

    #[test]
    fn superfluous_bindings_are_rejected() {
        let session = ScriptedSession::new();
        let handle = open(&session);
        let err = handle
            .query("select * from t where a = :a")
            .bind("a", 1_i64)
            .bind("b", 2_i64)
            .dml()
            .unwrap_err();
        let SqlPipelineError::SuperfluousBindings(names) = err else {
            panic!("expected superfluous bindings");
        };
        assert_eq!(names, vec![":b".to_string()]);
        assert!(session.events().contains("close statement"));
    }

    #[test]
    fn dml_reports_row_count() {
        let session = ScriptedSession::new();
        session.push_row_count(3);
        let handle = open(&session);
        let count = handle
            .query("update t set a = ? where b = :b")
            .bind_at(0, 5_i32)
            .bind("b", true)
            .dml()
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            session.events().take(),
            vec![
                "prepare update t set a = ? where b = ?",
                "bind 1=Int(5)",
                "bind 2=Bool(true)",
                "execute",
                "close statement",
            ]
        );
    }

    #[test]
    fn loosely_typed_positional_values() {
        let session = ScriptedSession::new();
        let handle = open(&session);
        handle
            .query("insert into t values (?, ?)")
            .bind_value_at(0, &SqlType::I16, Value::Int(12))
            .bind_value_at(1, &SqlType::optional(SqlType::Text), Value::Optional(None))
            .dml()
            .unwrap();
        assert_eq!(
            session.events().take(),
            vec![
                "prepare insert into t values (?, ?)",
                "bind 1=Int(12)",
                "bind 2=Null",
                "execute",
                "close statement",
            ]
        );

        let err = handle
            .query("select ?")
            .bind_value_at(0, &SqlType::I8, Value::Int(1000))
            .dml()
            .unwrap_err();
        assert!(matches!(err, SqlPipelineError::ConversionError(_)));
        assert!(session.events().take().is_empty());
    }

    #[test]
    fn statement_registrations_stay_local() {
        let session = ScriptedSession::new();
        session.push_rows(&["name"], vec![vec![RowValues::Text("ana".into())]]);
        session.push_rows(&["name"], vec![vec![RowValues::Text("ana".into())]]);
        let handle = open(&session);
        let shouting = handle
            .query("select name from t")
            .register_row_mapper(FnRowMapperFactory::new(
                SqlType::Text,
                |row: &DbRow| -> Result<Value, SqlPipelineError> {
                    let name = row.get_by_index(0).and_then(RowValues::as_text);
                    Ok(Value::Text(name.unwrap_or_default().to_uppercase()))
                },
            ))
            .select_as::<String>()
            .unwrap()
            .list()
            .unwrap();
        assert_eq!(shouting, vec!["ANA".to_string()]);

        let plain = handle
            .query("select name from t")
            .select_as::<String>()
            .unwrap()
            .list()
            .unwrap();
        assert_eq!(plain, vec!["ana".to_string()]);
    }
}
