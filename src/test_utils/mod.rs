//! Scripted in-memory driver for lifecycle tests.
//!
//! Every driver call is appended to a shared [`EventLog`], so tests can assert the exact order
//! of prepare, bind, execute and release calls. Executions answer from a queue of scripted
//! responses, and individual release calls can be made to fail.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::driver::{BufferedCursor, Cursor, Execution, NativeStatement, Session};
use crate::error::SqlPipelineError;
use crate::types::RowValues;

/// Shared, append-only record of driver calls.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    /// Copy of the events so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Drain the events so far.
    #[must_use]
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.0.borrow().iter().any(|e| e == event)
    }

    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == event).count()
    }
}

/// Scripted answer to one `execute` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<RowValues>>,
    },
    RowCount(usize),
    Fail(String),
}

#[derive(Default)]
struct Inner {
    events: EventLog,
    responses: RefCell<VecDeque<Scripted>>,
    in_transaction: Cell<bool>,
    closed: Cell<bool>,
    fail_prepare: Cell<bool>,
    fail_commit: Cell<bool>,
    fail_rollback: Cell<bool>,
    fail_close: Cell<bool>,
    fail_statement_close: Cell<bool>,
    fail_cursor_close: Cell<bool>,
}

fn scripted_failure(what: &str) -> SqlPipelineError {
    SqlPipelineError::ExecutionError(format!("scripted {what} failure"))
}

/// In-memory session answering from a script. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    inner: Rc<Inner>,
}

impl ScriptedSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> EventLog {
        self.inner.events.clone()
    }

    /// Queue a result set for the next execution.
    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<RowValues>>) {
        self.inner.responses.borrow_mut().push_back(Scripted::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        });
    }

    /// Queue an affected-row count for the next execution.
    pub fn push_row_count(&self, count: usize) {
        self.inner
            .responses
            .borrow_mut()
            .push_back(Scripted::RowCount(count));
    }

    /// Queue an execution failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.inner
            .responses
            .borrow_mut()
            .push_back(Scripted::Fail(message.into()));
    }

    pub fn fail_prepare(&self) {
        self.inner.fail_prepare.set(true);
    }

    pub fn fail_commit(&self) {
        self.inner.fail_commit.set(true);
    }

    pub fn fail_rollback(&self) {
        self.inner.fail_rollback.set(true);
    }

    pub fn fail_close(&self) {
        self.inner.fail_close.set(true);
    }

    pub fn fail_statement_close(&self) {
        self.inner.fail_statement_close.set(true);
    }

    pub fn fail_cursor_close(&self) {
        self.inner.fail_cursor_close.set(true);
    }
}

impl Session for ScriptedSession {
    fn prepare(&self, sql: &str) -> Result<Box<dyn NativeStatement>, SqlPipelineError> {
        self.inner.events.push(format!("prepare {sql}"));
        if self.inner.fail_prepare.get() {
            return Err(scripted_failure("prepare"));
        }
        Ok(Box::new(ScriptedStatement {
            inner: Rc::clone(&self.inner),
        }))
    }

    fn is_in_transaction(&self) -> bool {
        self.inner.in_transaction.get()
    }

    fn begin(&self) -> Result<(), SqlPipelineError> {
        self.inner.events.push("begin");
        self.inner.in_transaction.set(true);
        Ok(())
    }

    fn commit(&self) -> Result<(), SqlPipelineError> {
        self.inner.events.push("commit");
        self.inner.in_transaction.set(false);
        if self.inner.fail_commit.get() {
            return Err(scripted_failure("commit"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), SqlPipelineError> {
        self.inner.events.push("rollback");
        self.inner.in_transaction.set(false);
        if self.inner.fail_rollback.get() {
            return Err(scripted_failure("rollback"));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), SqlPipelineError> {
        if self.inner.closed.replace(true) {
            return Ok(());
        }
        self.inner.events.push("close session");
        if self.inner.fail_close.get() {
            return Err(scripted_failure("session close"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }
}

struct ScriptedStatement {
    inner: Rc<Inner>,
}

impl NativeStatement for ScriptedStatement {
    fn bind(&mut self, position: usize, value: RowValues) -> Result<(), SqlPipelineError> {
        self.inner.events.push(format!("bind {position}={value:?}"));
        Ok(())
    }

    fn execute(&mut self) -> Result<Execution, SqlPipelineError> {
        self.inner.events.push("execute");
        let next = self.inner.responses.borrow_mut().pop_front();
        match next.unwrap_or(Scripted::RowCount(0)) {
            Scripted::Rows { columns, rows } => Ok(Execution::Cursor(Box::new(ScriptedCursor {
                rows: BufferedCursor::new(columns, rows),
                inner: Rc::clone(&self.inner),
            }))),
            Scripted::RowCount(n) => Ok(Execution::RowCount(n)),
            Scripted::Fail(message) => Err(SqlPipelineError::ExecutionError(message)),
        }
    }

    fn close(&mut self) -> Result<(), SqlPipelineError> {
        self.inner.events.push("close statement");
        if self.inner.fail_statement_close.get() {
            return Err(scripted_failure("statement close"));
        }
        Ok(())
    }
}

struct ScriptedCursor {
    rows: BufferedCursor,
    inner: Rc<Inner>,
}

impl Cursor for ScriptedCursor {
    fn column_names(&self) -> &[String] {
        self.rows.column_names()
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlPipelineError> {
        self.rows.next_row()
    }

    fn close(&mut self) -> Result<(), SqlPipelineError> {
        self.inner.events.push("close cursor");
        self.rows.close()?;
        if self.inner.fail_cursor_close.get() {
            return Err(scripted_failure("cursor close"));
        }
        Ok(())
    }
}

/// Statement stub remembering what was bound where.
#[derive(Debug, Default)]
pub struct RecordingStatement {
    bound: BTreeMap<usize, RowValues>,
    closed: bool,
}

impl RecordingStatement {
    #[must_use]
    pub fn bound(&self, position: usize) -> Option<&RowValues> {
        self.bound.get(&position)
    }

    #[must_use]
    pub fn bound_values(&self) -> Vec<RowValues> {
        self.bound.values().cloned().collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl NativeStatement for RecordingStatement {
    fn bind(&mut self, position: usize, value: RowValues) -> Result<(), SqlPipelineError> {
        self.bound.insert(position, value);
        Ok(())
    }

    fn execute(&mut self) -> Result<Execution, SqlPipelineError> {
        Ok(Execution::RowCount(0))
    }

    fn close(&mut self) -> Result<(), SqlPipelineError> {
        self.closed = true;
        Ok(())
    }
}
