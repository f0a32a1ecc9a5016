use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::driver::{Cursor, NativeStatement, Session};
use crate::error::{CleanupFailure, SqlPipelineError};

/// A resource that must be released once.
pub trait Cleanable {
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn release(self: Box<Self>) -> Result<(), SqlPipelineError>;
}

impl<F> Cleanable for F
where
    F: FnOnce() -> Result<(), SqlPipelineError>,
{
    fn release(self: Box<Self>) -> Result<(), SqlPipelineError> {
        (*self)()
    }
}

/// Resources acquired by one statement execution, released last-in first-out.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use sql_pipeline::prelude::*;
///
/// let order = Rc::new(RefCell::new(Vec::new()));
/// let mut chain = CleanupChain::new();
/// for name in ["statement", "cursor"] {
///     let order = Rc::clone(&order);
///     chain.track(move || -> Result<(), SqlPipelineError> {
///         order.borrow_mut().push(name);
///         Ok(())
///     });
/// }
/// chain.cleanup()?;
/// assert_eq!(*order.borrow(), vec!["cursor", "statement"]);
/// assert!(chain.is_empty());
/// # Ok::<(), SqlPipelineError>(())
/// ```
#[derive(Default)]
pub struct CleanupChain {
    tracked: Vec<Box<dyn Cleanable>>,
}

impl fmt::Debug for CleanupChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupChain")
            .field("tracked", &self.tracked.len())
            .finish()
    }
}

impl CleanupChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track<C: Cleanable + 'static>(&mut self, cleanable: C) {
        self.tracked.push(Box::new(cleanable));
    }

    pub fn track_boxed(&mut self, cleanable: Box<dyn Cleanable>) {
        self.tracked.push(cleanable);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Release everything tracked, newest first, attempting every release even when earlier
    /// ones fail. The chain is empty afterwards either way.
    ///
    /// # Errors
    ///
    /// A single failure propagates as itself; several are returned as
    /// `SqlPipelineError::Cleanup` holding all of them in release order.
    pub fn cleanup(&mut self) -> Result<(), SqlPipelineError> {
        let mut tracked = std::mem::take(&mut self.tracked);
        tracked.reverse();
        trace!(count = tracked.len(), "releasing tracked resources");

        let mut failures = Vec::new();
        for cleanable in tracked {
            match cleanable.release() {
                Ok(()) => {}
                Err(SqlPipelineError::Cleanup(nested)) => failures.extend(nested.into_failures()),
                Err(err) => failures.push(err),
            }
        }
        CleanupFailure::aggregate(failures)
    }
}

impl Drop for CleanupChain {
    fn drop(&mut self) {
        if self.tracked.is_empty() {
            return;
        }
        if let Err(err) = self.cleanup() {
            warn!(error = %err, "cleanup failed while dropping statement resources");
        }
    }
}

/// Releases a prepared statement.
pub struct StatementCleanable(pub Box<dyn NativeStatement>);

impl Cleanable for StatementCleanable {
    fn release(mut self: Box<Self>) -> Result<(), SqlPipelineError> {
        self.0.close()
    }
}

/// Releases a result cursor shared with a result iterator.
pub struct CursorCleanable(pub Rc<RefCell<Box<dyn Cursor>>>);

impl Cleanable for CursorCleanable {
    fn release(self: Box<Self>) -> Result<(), SqlPipelineError> {
        self.0.borrow_mut().close()
    }
}

/// What happens to an open transaction when the owning session is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleDisposition {
    Commit,
    Rollback,
}

/// Ends any open transaction per its disposition, then closes the session.
pub struct HandleCleanable {
    session: Rc<dyn Session>,
    disposition: HandleDisposition,
}

impl HandleCleanable {
    #[must_use]
    pub fn new(session: Rc<dyn Session>, disposition: HandleDisposition) -> Self {
        Self {
            session,
            disposition,
        }
    }
}

impl Cleanable for HandleCleanable {
    fn release(self: Box<Self>) -> Result<(), SqlPipelineError> {
        let mut failures = Vec::new();
        if self.session.is_in_transaction() {
            let outcome = match self.disposition {
                HandleDisposition::Commit => self.session.commit(),
                HandleDisposition::Rollback => self.session.rollback(),
            };
            if let Err(err) = outcome {
                failures.push(err);
            }
        }
        if let Err(err) = self.session.close() {
            failures.push(err);
        }
        CleanupFailure::aggregate(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedSession;

    fn failing(tag: &'static str, log: Rc<RefCell<Vec<&'static str>>>) -> impl Cleanable {
        move || -> Result<(), SqlPipelineError> {
            log.borrow_mut().push(tag);
            Err(SqlPipelineError::ExecutionError(tag.into()))
        }
    }

    fn ok(tag: &'static str, log: Rc<RefCell<Vec<&'static str>>>) -> impl Cleanable {
        move || -> Result<(), SqlPipelineError> {
            log.borrow_mut().push(tag);
            Ok(())
        }
    }

    #[test]
    fn every_release_runs_despite_failures() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = CleanupChain::new();
        chain.track(ok("a", Rc::clone(&log)));
        chain.track(failing("b", Rc::clone(&log)));
        chain.track(ok("c", Rc::clone(&log)));
        chain.track(failing("d", Rc::clone(&log)));

        let Err(SqlPipelineError::Cleanup(failure)) = chain.cleanup() else {
            panic!("expected aggregated failure");
        };
        assert_eq!(*log.borrow(), vec!["d", "c", "b", "a"]);
        assert!(matches!(failure.primary(), SqlPipelineError::ExecutionError(m) if m == "d"));
        assert_eq!(failure.len(), 2);
        assert!(chain.is_empty());
        assert!(chain.cleanup().is_ok());
    }

    #[test]
    fn single_failure_propagates_directly() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = CleanupChain::new();
        chain.track(ok("a", Rc::clone(&log)));
        chain.track(failing("b", Rc::clone(&log)));
        assert!(matches!(
            chain.cleanup(),
            Err(SqlPipelineError::ExecutionError(m)) if m == "b"
        ));
    }

    #[test]
    fn dropping_releases_what_is_left() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut chain = CleanupChain::new();
            chain.track(ok("a", Rc::clone(&log)));
            chain.track(failing("b", Rc::clone(&log)));
        }
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn handle_commits_then_closes() {
        let session = ScriptedSession::new();
        session.begin().unwrap();
        let events = session.events();
        let mut chain = CleanupChain::new();
        chain.track(HandleCleanable::new(
            Rc::new(session),
            HandleDisposition::Commit,
        ));
        chain.cleanup().unwrap();
        assert_eq!(events.take(), vec!["begin", "commit", "close session"]);
    }

    #[test]
    fn handle_failures_are_aggregated() {
        let session = ScriptedSession::new();
        session.begin().unwrap();
        session.fail_rollback();
        session.fail_close();
        let mut chain = CleanupChain::new();
        chain.track(HandleCleanable::new(
            Rc::new(session),
            HandleDisposition::Rollback,
        ));
        let Err(SqlPipelineError::Cleanup(failure)) = chain.cleanup() else {
            panic!("expected both failures");
        };
        assert_eq!(failure.len(), 2);
    }
}
