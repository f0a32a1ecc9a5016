use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::cleanup::CursorCleanable;
use crate::driver::Cursor;
use crate::error::SqlPipelineError;
use crate::statement::StatementContext;
use crate::types::RowValues;

use super::{DbRow, column_index};

pub(crate) type RowFn<T> = Box<dyn Fn(&DbRow) -> Result<T, SqlPipelineError>>;

enum State {
    NotStarted,
    Positioned(Vec<RowValues>),
    Exhausted,
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::NotStarted => "not started",
            State::Positioned(_) => "positioned",
            State::Exhausted => "exhausted",
            State::Closed => "closed",
        }
    }
}

/// Single-pass iterator over a statement's result cursor.
///
/// Rows are mapped one at a time as they are pulled. The statement is closed as soon as the
/// cursor runs dry, which is detected eagerly: after the last row is returned the iterator is
/// already closed. Dropping an open iterator closes it too.
pub struct ResultIterator<T> {
    cursor: Rc<RefCell<Box<dyn Cursor>>>,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    map: RowFn<T>,
    ctx: StatementContext,
    state: State,
}

impl<T> fmt::Debug for ResultIterator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultIterator")
            .field("columns", &self.column_names)
            .field("state", &self.state.name())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl<T> ResultIterator<T> {
    /// Wrap `cursor`, registering it with the statement's cleanup chain.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::NoResults` when the statement produced no cursor at all; the
    /// statement is closed before returning.
    pub(crate) fn new(
        cursor: Option<Box<dyn Cursor>>,
        mut ctx: StatementContext,
        map: RowFn<T>,
    ) -> Result<Self, SqlPipelineError> {
        let Some(cursor) = cursor else {
            return Err(SqlPipelineError::NoResults.with_cleanup(ctx.close()));
        };
        let column_names = Arc::new(cursor.column_names().to_vec());
        let column_index = column_index(&column_names);
        let cursor = Rc::new(RefCell::new(cursor));
        ctx.track(CursorCleanable(Rc::clone(&cursor)));
        Ok(Self {
            cursor,
            column_names,
            column_index,
            map,
            ctx,
            state: State::NotStarted,
        })
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// True once the owning statement has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    #[must_use]
    pub fn context(&self) -> &StatementContext {
        &self.ctx
    }

    /// Whether another row is available. Repeated calls do not advance the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching fails; the statement is closed before returning.
    pub fn has_next(&mut self) -> Result<bool, SqlPipelineError> {
        if matches!(self.state, State::NotStarted) {
            self.advance()?;
        }
        Ok(matches!(self.state, State::Positioned(_)))
    }

    /// Map the current row and step to the next one.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::NoSuchElement` when no row is left, or the mapping or fetch
    /// failure; any failure closes the statement.
    pub fn next_row(&mut self) -> Result<T, SqlPipelineError> {
        if !self.has_next()? {
            return Err(SqlPipelineError::NoSuchElement);
        }
        let State::Positioned(values) = std::mem::replace(&mut self.state, State::NotStarted)
        else {
            return Err(SqlPipelineError::NoSuchElement);
        };
        let row = DbRow::with_index(
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index),
            values,
        );
        let mapped = match (self.map)(&row) {
            Ok(mapped) => mapped,
            Err(err) => return Err(self.fail(err)),
        };
        self.advance()?;
        Ok(mapped)
    }

    /// Release the cursor and the statement. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns the cleanup failure(s) of the first close; later calls succeed.
    pub fn close(&mut self) -> Result<(), SqlPipelineError> {
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        self.state = State::Closed;
        trace!("result iterator closed");
        self.ctx.close()
    }

    /// Collect every remaining row.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or mapping failure.
    pub fn list(mut self) -> Result<Vec<T>, SqlPipelineError> {
        let mut rows = Vec::new();
        while self.has_next()? {
            rows.push(self.next_row()?);
        }
        self.close()?;
        Ok(rows)
    }

    /// The only row of the result.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::NoSuchElement` for an empty result and
    /// `SqlPipelineError::TooManyRows` when more than one row exists.
    pub fn one(mut self) -> Result<T, SqlPipelineError> {
        let first = self.next_row()?;
        if self.has_next()? {
            return Err(SqlPipelineError::TooManyRows.with_cleanup(self.close()));
        }
        self.close()?;
        Ok(first)
    }

    /// The first row, if any, closing the statement without reading the rest.
    ///
    /// # Errors
    ///
    /// Returns the fetch, mapping or cleanup failure.
    pub fn find_first(mut self) -> Result<Option<T>, SqlPipelineError> {
        let first = if self.has_next()? {
            Some(self.next_row()?)
        } else {
            None
        };
        self.close()?;
        Ok(first)
    }

    fn advance(&mut self) -> Result<(), SqlPipelineError> {
        let fetched = self.cursor.borrow_mut().next_row();
        match fetched {
            Ok(Some(values)) => {
                self.state = State::Positioned(values);
                Ok(())
            }
            Ok(None) => {
                trace!("result cursor exhausted");
                self.state = State::Exhausted;
                self.close()
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: SqlPipelineError) -> SqlPipelineError {
        err.with_cleanup(self.close())
    }
}

impl<T> Iterator for ResultIterator<T> {
    type Item = Result<T, SqlPipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_row()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T> Drop for ResultIterator<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing an abandoned result iterator failed");
        }
    }
}
