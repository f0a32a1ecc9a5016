//! Boundary to the synchronous database driver: prepare, bind, execute, fetch, release.

use std::collections::VecDeque;
use std::fmt;

use crate::error::SqlPipelineError;
use crate::types::RowValues;

/// A physical connection as seen by the engine.
pub trait Session {
    /// Prepare `sql` for execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the statement.
    fn prepare(&self, sql: &str) -> Result<Box<dyn NativeStatement>, SqlPipelineError>;

    fn is_in_transaction(&self) -> bool;

    /// # Errors
    ///
    /// Returns an error if the driver cannot start a transaction.
    fn begin(&self) -> Result<(), SqlPipelineError>;

    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&self) -> Result<(), SqlPipelineError>;

    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&self) -> Result<(), SqlPipelineError>;

    /// Release the connection. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to release the connection.
    fn close(&self) -> Result<(), SqlPipelineError>;

    fn is_closed(&self) -> bool;
}

/// A prepared statement handle.
pub trait NativeStatement {
    /// Bind `value` into the 1-based parameter `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if the position is out of range or the driver rejects the value.
    fn bind(&mut self, position: usize, value: RowValues) -> Result<(), SqlPipelineError>;

    /// # Errors
    ///
    /// Returns an error if execution fails.
    fn execute(&mut self) -> Result<Execution, SqlPipelineError>;

    /// # Errors
    ///
    /// Returns an error if the driver fails to release the statement.
    fn close(&mut self) -> Result<(), SqlPipelineError>;
}

/// Outcome of executing a native statement.
pub enum Execution {
    /// The statement produced a result set, possibly empty.
    Cursor(Box<dyn Cursor>),
    /// The statement produced no result set, only an affected-row count.
    RowCount(usize),
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Cursor(cursor) => f
                .debug_tuple("Cursor")
                .field(&cursor.column_names())
                .finish(),
            Execution::RowCount(n) => f.debug_tuple("RowCount").field(n).finish(),
        }
    }
}

/// Forward-only result cursor.
pub trait Cursor {
    fn column_names(&self) -> &[String];

    /// Advance and return the next row, or `None` once exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching fails.
    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlPipelineError>;

    /// # Errors
    ///
    /// Returns an error if the driver fails to release the cursor.
    fn close(&mut self) -> Result<(), SqlPipelineError>;
}

/// Cursor over rows already fetched into memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedCursor {
    column_names: Vec<String>,
    rows: VecDeque<Vec<RowValues>>,
    closed: bool,
}

impl BufferedCursor {
    #[must_use]
    pub fn new(column_names: Vec<String>, rows: Vec<Vec<RowValues>>) -> Self {
        Self {
            column_names,
            rows: rows.into(),
            closed: false,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Cursor for BufferedCursor {
    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    fn next_row(&mut self) -> Result<Option<Vec<RowValues>>, SqlPipelineError> {
        if self.closed {
            return Err(SqlPipelineError::ExecutionError(
                "cursor is already closed".into(),
            ));
        }
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> Result<(), SqlPipelineError> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}
