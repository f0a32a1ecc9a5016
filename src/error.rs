use std::fmt;

use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;

use crate::types::SqlType;

#[derive(Debug, Error)]
pub enum SqlPipelineError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Malformed template at byte {position}: {reason}")]
    MalformedTemplate { position: usize, reason: String },

    #[error("Undefined attribute for token '<{0}>'")]
    UndefinedAttribute(String),

    #[error("{}", unresolved_message(.name, .position))]
    UnresolvedParameter { name: Option<String>, position: usize },

    #[error("No argument factory accepts a value declared as {0}")]
    UnbindableValue(SqlType),

    #[error("Superfluous bindings not used by the statement: {}", .0.join(", "))]
    SuperfluousBindings(Vec<String>),

    #[error("Statement produced no result set")]
    NoResults,

    #[error("Result iterator has no more rows")]
    NoSuchElement,

    #[error("Expected exactly one row but found more")]
    TooManyRows,

    #[error("No mapper registered for {0}")]
    NoMapper(SqlType),

    #[error("Unexpected NULL while mapping {0}")]
    UnexpectedNull(SqlType),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Conversion error: {0}")]
    ConversionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Cleanup(CleanupFailure),

    #[error("{source} (cleanup also failed: {cleanup})")]
    WithCleanup {
        #[source]
        source: Box<SqlPipelineError>,
        cleanup: Box<SqlPipelineError>,
    },
}

fn unresolved_message(name: &Option<String>, position: &usize) -> String {
    match name {
        Some(name) => format!(
            "No argument bound for named parameter '{name}' and no positional argument for place {position} ({} in the 1-based scheme)",
            position + 1
        ),
        None => format!("No argument bound for positional parameter {position}"),
    }
}

impl SqlPipelineError {
    /// Attach the outcome of a cleanup pass to a failure that triggered it.
    ///
    /// The original failure stays primary; a cleanup failure rides along instead of replacing it.
    #[must_use]
    pub fn with_cleanup(self, cleanup: Result<(), SqlPipelineError>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(cleanup) => SqlPipelineError::WithCleanup {
                source: Box::new(self),
                cleanup: Box::new(cleanup),
            },
        }
    }

    /// The failure that started the chain, looking through attached cleanup failures.
    #[must_use]
    pub fn primary(&self) -> &SqlPipelineError {
        match self {
            SqlPipelineError::WithCleanup { source, .. } => source.primary(),
            other => other,
        }
    }
}

/// Every failure raised while releasing a cleanup chain, in release order.
#[derive(Debug)]
pub struct CleanupFailure {
    primary: Box<SqlPipelineError>,
    secondary: Vec<SqlPipelineError>,
}

impl CleanupFailure {
    /// Collapse a list of release failures into a single reportable result.
    ///
    /// No failures is success, one failure propagates as itself, several become an aggregate.
    pub fn aggregate(mut failures: Vec<SqlPipelineError>) -> Result<(), SqlPipelineError> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => {
                let primary = failures.remove(0);
                Err(SqlPipelineError::Cleanup(CleanupFailure {
                    primary: Box::new(primary),
                    secondary: failures,
                }))
            }
        }
    }

    #[must_use]
    pub fn primary(&self) -> &SqlPipelineError {
        &self.primary
    }

    #[must_use]
    pub fn secondary(&self) -> &[SqlPipelineError] {
        &self.secondary
    }

    /// Total number of failures carried.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.secondary.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn into_failures(self) -> Vec<SqlPipelineError> {
        let mut all = Vec::with_capacity(self.len());
        all.push(*self.primary);
        all.extend(self.secondary);
        all
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup failed: {}", self.primary)?;
        if !self.secondary.is_empty() {
            write!(f, " (+{} more:", self.secondary.len())?;
            for err in &self.secondary {
                write!(f, " [{err}]")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.primary.as_ref())
    }
}
