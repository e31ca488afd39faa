//! The repository entry point: a database handle plus the policies every
//! operation shares (ID strategy, clock, timeouts, migration guard).

use std::time::Duration;

use chrono::SubsecRound;
use tenantry_core::types::Timestamp;

use crate::error::{ErrorContext, RepoError, RepoResult};
use crate::executor::{Database, Executor};
use crate::id_strategy::IdRetrievalStrategy;
use crate::migrate::MigrationGuard;
use crate::query_builder::CompiledQuery;
use crate::rows::{self, Aggregate, Count, Flag, Scan, Scanned};

/// Behavioural settings for a [`Querier`].
#[derive(Debug, Clone)]
pub struct QuerierConfig {
    pub id_strategy: IdRetrievalStrategy,
    /// Delay between readiness pings.
    pub ping_interval: Duration,
    /// Deadline for the write phase of each transaction.
    pub operation_timeout: Option<Duration>,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            id_strategy: IdRetrievalStrategy::default(),
            ping_interval: Duration::from_secs(1),
            operation_timeout: None,
        }
    }
}

/// Repository handle. Cheap to share by reference across tasks; every
/// transaction it opens is owned by the single call that opened it.
pub struct Querier<D> {
    db: D,
    config: QuerierConfig,
    migration: MigrationGuard,
    clock: fn() -> Timestamp,
}

/// Current time truncated to the database's microsecond precision.
fn system_clock() -> Timestamp {
    chrono::Utc::now().trunc_subsecs(6)
}

impl<D: Database> Querier<D> {
    pub fn new(db: D, config: QuerierConfig) -> Self {
        Self {
            db,
            config,
            migration: MigrationGuard::default(),
            clock: system_clock,
        }
    }

    /// Replace the clock used for `created_on` and audit timestamps.
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn config(&self) -> &QuerierConfig {
        &self.config
    }

    pub fn id_strategy(&self) -> IdRetrievalStrategy {
        self.config.id_strategy
    }

    pub(crate) fn migration_guard(&self) -> &MigrationGuard {
        &self.migration
    }

    pub(crate) fn now(&self) -> Timestamp {
        (self.clock)()
    }

    // -----------------------------------------------------------------------
    // Read helpers
    // -----------------------------------------------------------------------

    /// Fetch exactly one entity; no rows is `NotFound`.
    pub(crate) async fn fetch_one<T: Scan>(
        &self,
        operation: &'static str,
        context: ErrorContext,
        query: &CompiledQuery,
    ) -> RepoResult<T> {
        let mut conn = self.db.connection();
        let rows = conn.query(&query.sql, &query.args);
        rows::scan_one(rows)
            .await
            .map_err(|e| contextualize(e, operation, context))
    }

    pub(crate) async fn fetch_list<T: Scan>(
        &self,
        operation: &'static str,
        context: ErrorContext,
        query: &CompiledQuery,
        include_counts: bool,
    ) -> RepoResult<Scanned<T>> {
        let mut conn = self.db.connection();
        let rows = conn.query(&query.sql, &query.args);
        rows::scan_list(rows, include_counts)
            .await
            .map_err(|e| contextualize(e, operation, context))
    }

    pub(crate) async fn fetch_aggregate<P: Aggregate>(
        &self,
        operation: &'static str,
        context: ErrorContext,
        query: &CompiledQuery,
    ) -> RepoResult<P> {
        let mut conn = self.db.connection();
        let rows = conn.query(&query.sql, &query.args);
        rows::scan_aggregate(rows)
            .await
            .map_err(|e| contextualize(e, operation, context))
    }

    pub(crate) async fn fetch_aggregates<P: Aggregate>(
        &self,
        operation: &'static str,
        context: ErrorContext,
        query: &CompiledQuery,
    ) -> RepoResult<Scanned<P>> {
        let mut conn = self.db.connection();
        let rows = conn.query(&query.sql, &query.args);
        rows::scan_aggregates(rows, true)
            .await
            .map_err(|e| contextualize(e, operation, context))
    }

    /// Run a single-boolean query such as `SELECT EXISTS (...)`.
    pub(crate) async fn fetch_flag(
        &self,
        operation: &'static str,
        context: ErrorContext,
        query: &CompiledQuery,
    ) -> RepoResult<bool> {
        let Flag(value) = self.fetch_one(operation, context, query).await?;
        Ok(value)
    }

    pub(crate) async fn fetch_count(
        &self,
        operation: &'static str,
        query: &CompiledQuery,
    ) -> RepoResult<u64> {
        let Count(value) = self.fetch_one(operation, ErrorContext::new(), query).await?;
        Ok(value)
    }
}

/// Attach operation context to driver failures surfaced by a row source.
fn contextualize(err: RepoError, operation: &'static str, context: ErrorContext) -> RepoError {
    match err {
        RepoError::Iteration { source, .. } | RepoError::Close { source, .. } => {
            RepoError::database_with(operation, context, source)
        }
        other => other,
    }
}
