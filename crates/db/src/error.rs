//! Repository error taxonomy.
//!
//! Validation failures never touch the database. Everything else carries the
//! operation name and the IDs involved so a failure can be diagnosed without
//! re-running the query.

use std::fmt;
use std::sync::Arc;

use sqlx::migrate::MigrateError;
use tenantry_core::error::ValidationError;

use crate::transaction::TxPhase;

/// PostgreSQL SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{what}: no matching rows")]
    NotFound { what: &'static str },

    #[error("{operation} failed{context}: {source}")]
    Database {
        operation: &'static str,
        context: ErrorContext,
        #[source]
        source: sqlx::Error,
    },

    #[error("beginning transaction for {operation}: {source}")]
    Begin {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("committing {operation} failed, outcome unknown: {source}")]
    CommitOutcomeUnknown {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation}: {source}")]
    Step {
        operation: &'static str,
        step: &'static str,
        #[source]
        source: Box<RepoError>,
    },

    #[error("{operation} timed out while {phase}")]
    TimedOut {
        operation: &'static str,
        phase: TxPhase,
    },

    #[error("scanning {entity}: {source}")]
    Scan {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("iterating {entity} rows: {source}")]
    Iteration {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("closing {entity} rows: {source}")]
    Close {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} has no audit event")]
    InvalidAudit { operation: &'static str },

    #[error("database not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("running migrations: {0}")]
    Migration(#[source] Arc<MigrateError>),
}

impl RepoError {
    /// Wrap a driver error with the operation name and no extra context.
    pub fn database(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Database {
            operation,
            context: ErrorContext::default(),
            source,
        }
    }

    /// Wrap a driver error with the operation name and identifying fields.
    pub fn database_with(
        operation: &'static str,
        context: ErrorContext,
        source: sqlx::Error,
    ) -> Self {
        Self::Database {
            operation,
            context,
            source,
        }
    }

    pub(crate) fn step(operation: &'static str, step: &'static str, source: RepoError) -> Self {
        Self::Step {
            operation,
            step,
            source: Box::new(source),
        }
    }

    /// True when a lookup or write matched zero rows, at any wrapping depth.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when the underlying driver error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database { source, .. } => is_unique_violation(source),
            Self::Step { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ErrorContext
// ---------------------------------------------------------------------------

/// Identifying `key=value` fields attached to a database error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    fields: Vec<(&'static str, String)>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return Ok(());
        }
        f.write_str(" (")?;
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str(")")
    }
}
