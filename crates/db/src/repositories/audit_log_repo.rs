//! Repository for the append-only `audit_log` table.
//!
//! Entries are written only by the transaction protocol; this repository is
//! read-only.

use tenantry_core::error::ValidationError;
use tenantry_core::filter::{PaginatedResult, QueryFilter};
use tenantry_core::types::AuditLogEntryId;

use crate::error::{ErrorContext, RepoResult};
use crate::executor::{Database, SqlValue};
use crate::models::audit_log::AuditLogEntry;
use crate::querier::Querier;
use crate::query_builder::{compile, Predicate, QuerySpec};
use crate::schema::AUDIT_LOG;

/// Provides read access to audit log entries.
pub struct AuditLogRepo;

impl AuditLogRepo {
    /// Fetch one entry by ID.
    #[tracing::instrument(skip_all, fields(audit_log_entry_id = entry_id), err)]
    pub async fn get_audit_log_entry<D: Database>(
        q: &Querier<D>,
        entry_id: AuditLogEntryId,
    ) -> RepoResult<AuditLogEntry> {
        if entry_id <= 0 {
            return Err(ValidationError::InvalidId {
                field: AUDIT_LOG.id_field,
            }
            .into());
        }

        let query = compile(
            &QuerySpec::find(&AUDIT_LOG).filter_by(Predicate::Eq("id", SqlValue::BigInt(entry_id))),
        )?;
        q.fetch_one(
            "fetching audit log entry",
            ErrorContext::new().with("audit_log_entry_id", entry_id),
            &query,
        )
        .await
    }

    /// Page through all entries.
    #[tracing::instrument(skip_all, err)]
    pub async fn get_audit_log_entries<D: Database>(
        q: &Querier<D>,
        filter: Option<&QueryFilter>,
    ) -> RepoResult<PaginatedResult<AuditLogEntry>> {
        let query = compile(&QuerySpec::list(&AUDIT_LOG, filter))?;
        let scanned = q
            .fetch_list("fetching audit log entries", ErrorContext::new(), &query, true)
            .await?;
        Ok(scanned.into_page(filter))
    }

    #[tracing::instrument(skip_all, err)]
    pub async fn get_all_audit_log_entries_count<D: Database>(q: &Querier<D>) -> RepoResult<u64> {
        let query = compile(&QuerySpec::count(&AUDIT_LOG))?;
        q.fetch_count("fetching audit log entry count", &query).await
    }

    /// Entries whose context carries `key = value`, oldest first.
    pub(crate) async fn entries_with_context<D: Database>(
        q: &Querier<D>,
        operation: &'static str,
        key: &'static str,
        value: &str,
    ) -> RepoResult<Vec<AuditLogEntry>> {
        ValidationError::require_id(key, value)?;

        let query = compile(&QuerySpec::select(&AUDIT_LOG).filter_by(Predicate::JsonKeyEq {
            column: "context",
            key,
            value: value.to_string(),
        }))?;
        let scanned = q
            .fetch_list::<AuditLogEntry>(operation, ErrorContext::new().with(key, value), &query, false)
            .await?;
        Ok(scanned.items)
    }
}
