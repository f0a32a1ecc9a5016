use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::argument::{ArgumentFactory, ArgumentRegistry};
use crate::binding::{Binding, MapFinder};
use crate::cleanup::{HandleCleanable, HandleDisposition};
use crate::descriptor::StructDescriptor;
use crate::driver::{Execution, NativeStatement};
use crate::error::SqlPipelineError;
use crate::handle::Handle;
use crate::translation::{Attributes, RewritePlan};
use crate::typed::SqlTyped;
use crate::types::{SqlType, Value};

use super::StatementContext;

/// One template executed once per collected set of arguments.
///
/// The template is rewritten and prepared a single time; each part gets its own [`Binding`],
/// bound and executed in the order it was added. Every part shares one cleanup chain, so the
/// prepared statement is released once, after the last part or the first failure.
///
/// ```rust
/// use sql_pipeline::prelude::*;
/// use sql_pipeline::sqlite::SqliteSession;
///
/// let engine = Engine::new(EngineConfig::default())?;
/// let handle = engine.open(SqliteSession::open_in_memory()?);
/// handle.query("create table t (id integer, name text)").dml()?;
/// let counts = handle
///     .prepare_batch("insert into t values (:id, :name)")
///     .bind("id", 1_i64)
///     .bind("name", "ana".to_string())
///     .add()
///     .bind("id", 2_i64)
///     .bind("name", "bo".to_string())
///     .execute()?;
/// assert_eq!(counts, vec![1, 1]);
/// # Ok::<(), SqlPipelineError>(())
/// ```
pub struct Batch<'h> {
    handle: &'h Handle,
    template: String,
    parts: Vec<Binding>,
    current: Binding,
    args: ArgumentRegistry,
    attributes: Attributes,
    cleanup_handle: Option<HandleDisposition>,
    pending: Option<SqlPipelineError>,
}

impl fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("template", &self.template)
            .field("parts", &self.parts.len())
            .field("current", &self.current)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<'h> Batch<'h> {
    pub(crate) fn new(handle: &'h Handle, template: String) -> Self {
        Self {
            handle,
            template,
            parts: Vec::new(),
            current: Binding::new(),
            args: handle.arguments().fork_child(),
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

    #[must_use]
    pub fn bind<T: SqlTyped>(self, name: &str, value: T) -> Self {
        self.bind_value(name, &T::sql_type(), value.into_value())
    }

    #[must_use]
    pub fn bind_at<T: SqlTyped>(self, position: usize, value: T) -> Self {
        self.bind_value_at(position, &T::sql_type(), value.into_value())
    }

    #[must_use]
    pub fn bind_value(mut self, name: &str, declared: &SqlType, value: Value) -> Self {
        let outcome = self
            .args
            .resolve(declared, &value)
            .map(|encoder| self.current.bind_named(name, encoder));
        self.defer(outcome);
        self
    }

    #[must_use]
    pub fn bind_value_at(mut self, position: usize, declared: &SqlType, value: Value) -> Self {
        let outcome = self
            .args
            .resolve(declared, &value)
            .map(|encoder| self.current.bind_positional(position, encoder));
        self.defer(outcome);
        self
    }

    #[must_use]
    pub fn bind_map(mut self, values: HashMap<String, Value>) -> Self {
        self.current.add_finder(Box::new(MapFinder::new(values)));
        self
    }

    #[must_use]
    pub fn bind_struct<T>(mut self, descriptor: &StructDescriptor<T>, value: T) -> Self
    where
        T: Default + Send + Sync + 'static,
    {
        self.current.add_finder(Box::new(descriptor.finder(value)));
        self
    }

    /// Set a `<key>` attribute, shared by every part.
    #[must_use]
    pub fn define<T: SqlTyped>(mut self, key: &str, value: T) -> Self {
        self.attributes.insert(key.to_string(), value.into_value());
        self
    }

    #[must_use]
    pub fn register_argument<F: ArgumentFactory + 'static>(self, factory: F) -> Self {
        self.args.register(factory);
        self
    }

    #[must_use]
    pub fn cleanup_handle_commit(mut self) -> Self {
        self.cleanup_handle = Some(HandleDisposition::Commit);
        self
    }

    #[must_use]
    pub fn cleanup_handle_rollback(mut self) -> Self {
        self.cleanup_handle = Some(HandleDisposition::Rollback);
        self
    }

    /// Close the arguments bound so far into a part and start a fresh one.
    #[must_use]
    pub fn add(mut self) -> Self {
        let part = std::mem::replace(&mut self.current, Binding::new());
        self.parts.push(part);
        self
    }

    /// Parts collected so far, not counting arguments bound since the last [`Batch::add`].
    #[must_use]
    pub fn size(&self) -> usize {
        self.parts.len()
    }

    /// Execute every part in order and return the affected-row count of each.
    ///
    /// Arguments bound after the last [`Batch::add`] form a final part. A batch with no parts
    /// prepares nothing and returns an empty list. A part that yields a result set counts zero.
    ///
    /// # Errors
    ///
    /// Returns the first rewriting, binding, preparation or execution failure; the prepared
    /// statement is released before it is returned, with any release failure attached.
    pub fn execute(mut self) -> Result<Vec<usize>, SqlPipelineError> {
        if !self.current.is_empty() {
            self = self.add();
        }

        let mut ctx = StatementContext::new(self.template.clone(), self.attributes.clone());
        if let Some(disposition) = self.cleanup_handle {
            ctx.track(HandleCleanable::new(self.handle.session(), disposition));
        }
        if let Some(err) = self.pending.take() {
            return Err(err.with_cleanup(ctx.close()));
        }
        if self.parts.is_empty() {
            ctx.close()?;
            return Ok(Vec::new());
        }

        let plan = match self.handle.rewriter().rewrite(&self.template, &self.attributes) {
            Ok(plan) => plan,
            Err(err) => return Err(err.with_cleanup(ctx.close())),
        };
        ctx.set_plan(Arc::clone(&plan));
        debug!(sql = %plan.sql(), parts = self.parts.len(), "executing batch");

        let mut native = match self.handle.session().prepare(plan.sql()) {
            Ok(native) => native,
            Err(err) => return Err(err.with_cleanup(ctx.close())),
        };
        let outcome = self.run_parts(&plan, native.as_mut());
        ctx.track_statement(native);
        self.parts.clear();

        match outcome {
            Ok(counts) => {
                ctx.close()?;
                Ok(counts)
            }
            Err(err) => Err(err.with_cleanup(ctx.close())),
        }
    }

    fn run_parts(
        &self,
        plan: &RewritePlan,
        native: &mut dyn NativeStatement,
    ) -> Result<Vec<usize>, SqlPipelineError> {
        let allow_unused = self.handle.config().allow_unused_bindings;
        let mut counts = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            plan.bind(part, &self.args, native, allow_unused)?;
            let count = match native.execute()? {
                Execution::RowCount(count) => count,
                Execution::Cursor(mut cursor) => {
                    cursor.close()?;
                    0
                }
            };
            counts.push(count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::error::SqlPipelineError;
    use crate::test_utils::ScriptedSession;

    #[test]
    fn one_prepare_many_executions() {
        let session = ScriptedSession::new();
        session.push_row_count(1);
        session.push_row_count(2);
        let handle = Engine::new(EngineConfig::default())
            .unwrap()
            .open(session.clone());
        let counts = handle
            .prepare_batch("update t set a = :a where b = ?")
            .bind("a", 1_i64)
            .bind_at(1, 10_i64)
            .add()
            .bind("a", 2_i64)
            .bind_at(1, 20_i64)
            .execute()
            .unwrap();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(
            session.events().take(),
            vec![
                "prepare update t set a = ? where b = ?",
                "bind 1=Int(1)",
                "bind 2=Int(10)",
                "execute",
                "bind 1=Int(2)",
                "bind 2=Int(20)",
                "execute",
                "close statement",
            ]
        );
    }

    #[test]
    fn empty_batch_touches_nothing() {
        let session = ScriptedSession::new();
        let handle = Engine::new(EngineConfig::default())
            .unwrap()
            .open(session.clone());
        let counts = handle.prepare_batch("insert into t values (:a)").execute();
        assert_eq!(counts.unwrap(), Vec::<usize>::new());
        assert!(session.events().take().is_empty());
    }

    #[test]
    fn missing_argument_in_later_part_releases_statement() {
        let session = ScriptedSession::new();
        let handle = Engine::new(EngineConfig::default())
            .unwrap()
            .open(session.clone());
        let err = handle
            .prepare_batch("insert into t values (:a, :b)")
            .bind("a", 1_i64)
            .bind("b", 2_i64)
            .add()
            .bind("a", 3_i64)
            .execute()
            .unwrap_err();
        let SqlPipelineError::UnresolvedParameter { name, position } = err else {
            panic!("expected an unresolved parameter");
        };
        assert_eq!(name.as_deref(), Some("b"));
        assert_eq!(position, 1);
        assert_eq!(
            session.events().take(),
            vec![
                "prepare insert into t values (?, ?)",
                "bind 1=Int(1)",
                "bind 2=Int(2)",
                "execute",
                "close statement",
            ]
        );
    }
}
