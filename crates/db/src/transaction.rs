//! Write-Transaction Protocol.
//!
//! A [`TransactionPlan`] is the primary write, its dependent writes and the
//! audit events describing them. [`Querier::run_transaction`] executes it as
//! one unit:
//!
//! ```text
//! Validating -> TransactionOpen -> Writing -> AuditWriting -> Committing -> Done
//!                     \______________\___________\__-> RollingBack -> Failed
//! ```
//!
//! Any failed step rolls back and returns that step's error wrapped with the
//! operation name; no later step runs. A failed rollback is logged and the
//! original error is still returned. A failed commit is reported as
//! `CommitOutcomeUnknown` and never retried.

use std::fmt;

use tenantry_core::audit::AuditEvent;
use tenantry_core::types::Timestamp;

use crate::error::{ErrorContext, RepoError, RepoResult};
use crate::executor::{Database, SqlValue, Transaction};
use crate::id_strategy::IdRetrievalStrategy;
use crate::querier::Querier;

pub(crate) const INSERT_AUDIT_LOG_ENTRY: &str = "\
    INSERT INTO audit_log (event_type, context, created_on) \
    VALUES ($1, $2, $3) RETURNING id";

const AUDIT_STEP: &str = "audit log entry creation";

// ---------------------------------------------------------------------------
// TxPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Validating,
    TransactionOpen,
    Writing,
    AuditWriting,
    Committing,
    Done,
    RollingBack,
    Failed,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxPhase::Validating => "validating",
            TxPhase::TransactionOpen => "transaction open",
            TxPhase::Writing => "writing",
            TxPhase::AuditWriting => "writing audit events",
            TxPhase::Committing => "committing",
            TxPhase::Done => "done",
            TxPhase::RollingBack => "rolling back",
            TxPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(operation: &'static str, phase: &mut TxPhase, next: TxPhase) {
    tracing::trace!(operation, from = %phase, to = %next, "Transaction phase change");
    *phase = next;
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One statement in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    pub description: &'static str,
    pub sql: String,
    pub args: Vec<SqlValue>,
    /// Owner and entity IDs reported when the statement fails.
    pub context: ErrorContext,
    /// When true (the default), matching zero rows fails the transaction.
    pub require_match: bool,
}

impl WriteStep {
    pub fn new(description: &'static str, sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            description,
            sql: sql.into(),
            args,
            context: ErrorContext::default(),
            require_match: true,
        }
    }

    pub fn context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Accept a statement that matches no rows.
    pub fn allow_no_match(mut self) -> Self {
        self.require_match = false;
        self
    }
}

/// Ordered writes plus their audit events, executed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPlan {
    operation: &'static str,
    steps: Vec<WriteStep>,
    audits: Vec<AuditEvent>,
}

impl TransactionPlan {
    pub fn new(operation: &'static str, primary: WriteStep) -> Self {
        Self {
            operation,
            steps: vec![primary],
            audits: Vec::new(),
        }
    }

    /// Append a dependent write, run after every write added before it.
    pub fn then(mut self, step: WriteStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append an audit event, written after all writes.
    pub fn audit(mut self, event: AuditEvent) -> Self {
        self.audits.push(event);
        self
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl<D: Database> Querier<D> {
    /// Execute `plan` in one transaction.
    ///
    /// Returns the identifier produced by the primary write when the
    /// configured strategy reads one back.
    pub async fn run_transaction(&self, plan: TransactionPlan) -> RepoResult<Option<String>> {
        let operation = plan.operation;
        let mut phase = TxPhase::Validating;

        if plan.audits.is_empty() {
            return Err(RepoError::InvalidAudit { operation });
        }

        let mut tx = self
            .database()
            .begin()
            .await
            .map_err(|source| RepoError::Begin { operation, source })?;
        transition(operation, &mut phase, TxPhase::TransactionOpen);

        let strategy = self.id_strategy();
        let now = self.now();
        let outcome = match self.config().operation_timeout {
            Some(limit) => {
                let result =
                    tokio::time::timeout(limit, apply_plan(&mut tx, &plan, strategy, now, &mut phase))
                        .await;
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RepoError::TimedOut { operation, phase }),
                }
            }
            None => apply_plan(&mut tx, &plan, strategy, now, &mut phase).await,
        };

        match outcome {
            Ok(id) => {
                transition(operation, &mut phase, TxPhase::Committing);
                if let Err(source) = tx.commit().await {
                    tracing::error!(operation, error = %source, "Commit failed, outcome unknown");
                    return Err(RepoError::CommitOutcomeUnknown { operation, source });
                }
                transition(operation, &mut phase, TxPhase::Done);
                Ok(id)
            }
            Err(err) => {
                tracing::warn!(operation, phase = %phase, error = %err, "Rolling back transaction");
                transition(operation, &mut phase, TxPhase::RollingBack);
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(operation, error = %rollback_err, "Failed to roll back transaction");
                }
                transition(operation, &mut phase, TxPhase::Failed);
                Err(err)
            }
        }
    }
}

async fn apply_plan<T: Transaction>(
    tx: &mut T,
    plan: &TransactionPlan,
    strategy: IdRetrievalStrategy,
    now: Timestamp,
    phase: &mut TxPhase,
) -> RepoResult<Option<String>> {
    transition(plan.operation, phase, TxPhase::Writing);

    let mut primary_id = None;
    for (index, step) in plan.steps.iter().enumerate() {
        match strategy
            .perform_write(&mut *tx, step.description, &step.context, &step.sql, &step.args)
            .await
        {
            Ok(id) => {
                if index == 0 {
                    primary_id = id;
                }
            }
            Err(err) if err.is_not_found() && !step.require_match => {}
            Err(err) => return Err(RepoError::step(plan.operation, step.description, err)),
        }
    }

    transition(plan.operation, phase, TxPhase::AuditWriting);
    for event in &plan.audits {
        let args = vec![
            SqlValue::from(event.event_type.as_str()),
            SqlValue::Json(serde_json::Value::Object(event.context.clone())),
            SqlValue::Timestamp(now),
        ];
        let context = ErrorContext::new().with("event_type", &event.event_type);
        strategy
            .perform_write(&mut *tx, AUDIT_STEP, &context, INSERT_AUDIT_LOG_ENTRY, &args)
            .await
            .map_err(|err| RepoError::step(plan.operation, AUDIT_STEP, err))?;
    }

    Ok(primary_id)
}
