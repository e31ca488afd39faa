//! ID Retrieval Strategy: how a write learns that it matched a row and
//! which identifier it produced.
//!
//! Write statements in this crate always end in `RETURNING id`, so either
//! strategy can run any of them. Zero matched rows is `NotFound` under both.

use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorContext, RepoError, RepoResult};
use crate::executor::{Executor, SqlValue};
use crate::rows::{scan_optional, ReturnedId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdRetrievalStrategy {
    /// Execute, then check the affected-row count. The identifier is whatever
    /// the caller generated; nothing is read back.
    ExecAffectedRows,
    /// Run the statement as a query and read the single returned ID column.
    #[default]
    ReturningStatement,
}

impl IdRetrievalStrategy {
    /// Run one write through `executor`.
    ///
    /// Returns the identifier read back from the database under
    /// `ReturningStatement`, and `None` under `ExecAffectedRows`. Driver
    /// failures carry `context`.
    pub async fn perform_write<E>(
        self,
        executor: &mut E,
        description: &'static str,
        context: &ErrorContext,
        sql: &str,
        args: &[SqlValue],
    ) -> RepoResult<Option<String>>
    where
        E: Executor + ?Sized,
    {
        match self {
            IdRetrievalStrategy::ExecAffectedRows => {
                let affected = executor
                    .exec(sql, args)
                    .await
                    .map_err(|source| RepoError::database_with(description, context.clone(), source))?;
                if affected == 0 {
                    return Err(RepoError::NotFound { what: description });
                }
                Ok(None)
            }
            IdRetrievalStrategy::ReturningStatement => {
                let rows = executor.query(sql, args);
                let returned = scan_optional::<ReturnedId, _>(rows)
                    .await
                    .map_err(|e| match e {
                        RepoError::Iteration { source, .. } | RepoError::Close { source, .. } => {
                            RepoError::database_with(description, context.clone(), source)
                        }
                        other => other,
                    })?;
                match returned {
                    Some(ReturnedId(id)) => Ok(Some(id)),
                    None => Err(RepoError::NotFound { what: description }),
                }
            }
        }
    }
}

impl fmt::Display for IdRetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdRetrievalStrategy::ExecAffectedRows => f.write_str("affected_rows"),
            IdRetrievalStrategy::ReturningStatement => f.write_str("returning"),
        }
    }
}

impl FromStr for IdRetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "affected_rows" => Ok(IdRetrievalStrategy::ExecAffectedRows),
            "returning" => Ok(IdRetrievalStrategy::ReturningStatement),
            other => Err(format!("unknown id retrieval strategy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Database;
    use crate::testing::{row, FakeDatabase};

    const SQL: &str = "UPDATE items SET name = $1 WHERE id = $2 RETURNING id";

    #[tokio::test]
    async fn affected_rows_accepts_nonzero_count() {
        let db = FakeDatabase::new();
        db.push_exec(Ok(1));
        let mut conn = db.connection();

        let id = IdRetrievalStrategy::ExecAffectedRows
            .perform_write(&mut conn, "item update", &ErrorContext::new(), SQL, &[])
            .await
            .unwrap();
        assert_eq!(id, None);
        assert_eq!(db.events(), vec![format!("exec {SQL}")]);
    }

    #[tokio::test]
    async fn affected_rows_zero_is_not_found() {
        let db = FakeDatabase::new();
        db.push_exec(Ok(0));
        let mut conn = db.connection();

        let err = IdRetrievalStrategy::ExecAffectedRows
            .perform_write(&mut conn, "item update", &ErrorContext::new(), SQL, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound { what: "item update" }));
    }

    #[tokio::test]
    async fn returning_reads_identifier() {
        let db = FakeDatabase::new();
        db.push_rows(vec![row!["item-1"]]);
        let mut conn = db.connection();

        let id = IdRetrievalStrategy::ReturningStatement
            .perform_write(&mut conn, "item update", &ErrorContext::new(), SQL, &[])
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("item-1"));
        assert_eq!(db.events(), vec![format!("query {SQL}")]);
    }

    #[tokio::test]
    async fn returning_accepts_integer_keys() {
        let db = FakeDatabase::new();
        db.push_rows(vec![row![42i64]]);
        let mut conn = db.connection();

        let id = IdRetrievalStrategy::ReturningStatement
            .perform_write(&mut conn, "audit log entry", &ErrorContext::new(), SQL, &[])
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn returning_no_rows_is_not_found() {
        let db = FakeDatabase::new();
        db.push_rows(vec![]);
        let mut conn = db.connection();

        let err = IdRetrievalStrategy::ReturningStatement
            .perform_write(&mut conn, "item update", &ErrorContext::new(), SQL, &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn driver_failures_are_database_errors_under_both() {
        let db = FakeDatabase::new();
        db.push_exec(Err(sqlx::Error::Protocol("boom".into())));
        db.push_query_error(sqlx::Error::Protocol("boom".into()));
        let mut conn = db.connection();
        let context = ErrorContext::new().with("item_id", "i1");

        let exec_err = IdRetrievalStrategy::ExecAffectedRows
            .perform_write(&mut conn, "item update", &context, SQL, &[])
            .await
            .unwrap_err();
        let query_err = IdRetrievalStrategy::ReturningStatement
            .perform_write(&mut conn, "item update", &context, SQL, &[])
            .await
            .unwrap_err();

        assert!(matches!(exec_err, RepoError::Database { operation: "item update", .. }));
        assert!(matches!(query_err, RepoError::Database { operation: "item update", .. }));
        assert!(exec_err.to_string().contains("item_id=i1"));
        assert!(query_err.to_string().contains("item_id=i1"));
    }

    #[test]
    fn parses_config_names() {
        assert_eq!(
            "affected_rows".parse::<IdRetrievalStrategy>(),
            Ok(IdRetrievalStrategy::ExecAffectedRows)
        );
        assert_eq!(
            "returning".parse::<IdRetrievalStrategy>(),
            Ok(IdRetrievalStrategy::ReturningStatement)
        );
        assert!("sometimes".parse::<IdRetrievalStrategy>().is_err());
    }
}
