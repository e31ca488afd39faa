//! Capability seams between repository code and the SQL driver.
//!
//! Write helpers are written against [`Executor`], which both a bare pooled
//! connection and an open [`Transaction`] implement, so the same helper runs
//! inside or outside a transaction. Reads stream through a [`RowSource`].

use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use tenantry_core::types::Timestamp;

use crate::rows::ScanRow;

// ---------------------------------------------------------------------------
// SqlValue
// ---------------------------------------------------------------------------

/// Typed positional argument for a dynamically-built statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    NullableText(Option<String>),
    BigInt(i64),
    Bool(bool),
    Timestamp(Timestamp),
    NullableTimestamp(Option<Timestamp>),
    Json(serde_json::Value),
    TextArray(Vec<String>),
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::NullableText(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<Timestamp> for SqlValue {
    fn from(v: Timestamp) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Option<Timestamp>> for SqlValue {
    fn from(v: Option<Timestamp>) -> Self {
        SqlValue::NullableTimestamp(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        SqlValue::TextArray(v)
    }
}

// ---------------------------------------------------------------------------
// Row source
// ---------------------------------------------------------------------------

/// A sequential, single-pass, closable result set.
///
/// `next` advances to the following row and returns `false` once the set is
/// exhausted or an iteration error occurred; `err` then yields that error.
/// `close` releases the underlying resources and drains anything unread.
#[async_trait]
pub trait RowSource: Send {
    type Row: ScanRow;

    async fn next(&mut self) -> bool;

    /// The row `next` last advanced to.
    fn current(&self) -> Option<&Self::Row>;

    fn err(&mut self) -> Option<sqlx::Error>;

    async fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// Boxed row source borrowed from an executor for `'e`.
pub type BoxRows<'e, R> = Box<dyn RowSource<Row = R> + 'e>;

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Something that can run statements: a pooled connection or a transaction.
#[async_trait]
pub trait Executor: Send {
    type Row: ScanRow;

    /// Execute a statement, returning the affected row count.
    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64, sqlx::Error>;

    /// Start a query. Nothing is sent until the row source is advanced.
    fn query<'e>(&'e mut self, sql: &'e str, args: &'e [SqlValue]) -> BoxRows<'e, Self::Row>;
}

/// An open transaction. Terminates by exactly one of commit or rollback;
/// dropping it without either rolls back.
#[async_trait]
pub trait Transaction: Executor + Sized {
    async fn commit(self) -> Result<(), sqlx::Error>;

    async fn rollback(self) -> Result<(), sqlx::Error>;
}

/// Shared handle to a database: hands out executors and transactions and
/// answers readiness and migration requests.
#[async_trait]
pub trait Database: Send + Sync {
    type Row: ScanRow;
    type Conn: Executor<Row = Self::Row>;
    type Tx: Transaction<Row = Self::Row>;

    fn connection(&self) -> Self::Conn;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;

    /// Lightweight connectivity check.
    async fn ping(&self) -> Result<(), sqlx::Error>;

    async fn apply_migrations(&self) -> Result<(), MigrateError>;
}
