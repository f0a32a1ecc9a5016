//! `SQLite` driver adapter built on rusqlite.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::{debug, trace};

use crate::driver::{BufferedCursor, Execution, NativeStatement, Session};
use crate::error::SqlPipelineError;
use crate::types::RowValues;

pub mod params;

use params::{row_value_to_sqlite_value, sqlite_extract_value};

/// A session over one owned rusqlite connection.
///
/// ```rust
/// use sql_pipeline::prelude::*;
/// use sql_pipeline::sqlite::SqliteSession;
///
/// let session = SqliteSession::open_in_memory()?;
/// assert!(!session.is_in_transaction());
/// session.close()?;
/// assert!(session.is_closed());
/// # Ok::<(), SqlPipelineError>(())
/// ```
pub struct SqliteSession {
    conn: RefCell<Option<Rc<Connection>>>,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqliteSession {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::SqliteError` if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlPipelineError> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sqlite session");
        Ok(Self::from_connection(conn))
    }

    /// # Errors
    ///
    /// Returns `SqlPipelineError::SqliteError` if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self, SqlPipelineError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: RefCell::new(Some(Rc::new(conn))),
        }
    }

    /// Run several `;`-separated statements with no parameters and no results.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqlPipelineError> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    fn connection(&self) -> Result<Rc<Connection>, SqlPipelineError> {
        self.conn
            .borrow()
            .as_ref()
            .map(Rc::clone)
            .ok_or_else(|| SqlPipelineError::ExecutionError("sqlite session is closed".into()))
    }
}

impl Session for SqliteSession {
    fn prepare(&self, sql: &str) -> Result<Box<dyn NativeStatement>, SqlPipelineError> {
        let conn = self.connection()?;
        // prepared once here so syntax errors surface before binding
        let parameter_count = conn.prepare_cached(sql)?.parameter_count();
        trace!(sql, parameter_count, "prepared sqlite statement");
        Ok(Box::new(SqliteStatement {
            conn,
            sql: sql.to_string(),
            params: vec![Value::Null; parameter_count],
            closed: false,
        }))
    }

    fn is_in_transaction(&self) -> bool {
        self.conn
            .borrow()
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    fn begin(&self) -> Result<(), SqlPipelineError> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> Result<(), SqlPipelineError> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> Result<(), SqlPipelineError> {
        self.execute_batch("ROLLBACK")
    }

    fn close(&self) -> Result<(), SqlPipelineError> {
        let Some(conn) = self.conn.borrow_mut().take() else {
            return Ok(());
        };
        match Rc::try_unwrap(conn) {
            Ok(conn) => conn.close().map_err(|(_, err)| SqlPipelineError::SqliteError(err)),
            // a statement still holds the connection; it closes when that statement drops
            Err(_) => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.borrow().is_none()
    }
}

/// Statement text plus collected parameters, run through the connection's statement cache on
/// execution.
///
/// A query reads its whole result set into a [`BufferedCursor`] before `execute` returns.
/// rusqlite's `Rows` borrows the `Statement`, which borrows the `Connection`, so a cursor that
/// outlived this call would have to own all three at once. Buffering costs memory for large
/// results and means fetch errors are reported by `execute`, not by a later `next_row`; rows
/// are still mapped lazily, and the cursor is still released through the cleanup chain.
struct SqliteStatement {
    conn: Rc<Connection>,
    sql: String,
    params: Vec<Value>,
    closed: bool,
}

impl SqliteStatement {
    fn ensure_open(&self) -> Result<(), SqlPipelineError> {
        if self.closed {
            return Err(SqlPipelineError::ExecutionError(
                "sqlite statement is closed".into(),
            ));
        }
        Ok(())
    }
}

impl NativeStatement for SqliteStatement {
    fn bind(&mut self, position: usize, value: RowValues) -> Result<(), SqlPipelineError> {
        self.ensure_open()?;
        let count = self.params.len();
        let slot = position
            .checked_sub(1)
            .and_then(|index| self.params.get_mut(index))
            .ok_or_else(|| {
                SqlPipelineError::ExecutionError(format!(
                    "parameter {position} is out of range; statement takes {count}"
                ))
            })?;
        *slot = row_value_to_sqlite_value(value);
        Ok(())
    }

    fn execute(&mut self) -> Result<Execution, SqlPipelineError> {
        self.ensure_open()?;
        let mut stmt = self.conn.prepare_cached(&self.sql)?;
        for (index, value) in self.params.iter().enumerate() {
            stmt.raw_bind_parameter(index + 1, value)?;
        }

        if stmt.column_count() == 0 {
            let affected = stmt.raw_execute()?;
            return Ok(Execution::RowCount(affected));
        }

        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let column_count = column_names.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(sqlite_extract_value(row, i)?);
            }
            rows.push(values);
        }
        Ok(Execution::Cursor(Box::new(BufferedCursor::new(
            column_names,
            rows,
        ))))
    }

    fn close(&mut self) -> Result<(), SqlPipelineError> {
        self.closed = true;
        self.params.clear();
        Ok(())
    }
}
