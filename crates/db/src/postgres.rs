//! PostgreSQL implementation of the executor seams over `sqlx`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, Row};
use tenantry_core::types::Timestamp;

use crate::executor::{BoxRows, Database, Executor, RowSource, SqlValue, Transaction};
use crate::rows::ScanRow;

/// Embedded schema migrations from `crates/db/migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pool-backed [`Database`].
#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    type Row = PgRow;
    type Conn = PoolExecutor;
    type Tx = TransactionExecutor;

    fn connection(&self) -> PoolExecutor {
        PoolExecutor {
            pool: self.pool.clone(),
        }
    }

    async fn begin(&self) -> Result<TransactionExecutor, sqlx::Error> {
        let tx = self.pool.begin().await?;
        Ok(TransactionExecutor { tx })
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await
    }

    async fn apply_migrations(&self) -> Result<(), MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Runs each statement on whichever pooled connection is free.
#[derive(Debug, Clone)]
pub struct PoolExecutor {
    pool: PgPool,
}

#[async_trait]
impl Executor for PoolExecutor {
    type Row = PgRow;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let result = bind_values(sqlx::query(sql), args).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn query<'e>(&'e mut self, sql: &'e str, args: &'e [SqlValue]) -> BoxRows<'e, PgRow> {
        Box::new(PgRowSource::new(bind_values(sqlx::query(sql), args).fetch(&self.pool)))
    }
}

/// An open transaction. Dropping it without commit rolls back.
pub struct TransactionExecutor {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Executor for TransactionExecutor {
    type Row = PgRow;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let result = bind_values(sqlx::query(sql), args).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    fn query<'e>(&'e mut self, sql: &'e str, args: &'e [SqlValue]) -> BoxRows<'e, PgRow> {
        Box::new(PgRowSource::new(bind_values(sqlx::query(sql), args).fetch(&mut *self.tx)))
    }
}

#[async_trait]
impl Transaction for TransactionExecutor {
    async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg.clone() {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::NullableText(v) => query.bind(v),
            SqlValue::BigInt(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
            SqlValue::NullableTimestamp(v) => query.bind(v),
            SqlValue::Json(v) => query.bind(v),
            SqlValue::TextArray(v) => query.bind(v),
        };
    }
    query
}

// ---------------------------------------------------------------------------
// Row source
// ---------------------------------------------------------------------------

/// Adapts a `sqlx` row stream to [`RowSource`].
pub struct PgRowSource<'e> {
    stream: BoxStream<'e, Result<PgRow, sqlx::Error>>,
    current: Option<PgRow>,
    err: Option<sqlx::Error>,
    exhausted: bool,
}

impl<'e> PgRowSource<'e> {
    fn new(stream: BoxStream<'e, Result<PgRow, sqlx::Error>>) -> Self {
        Self {
            stream,
            current: None,
            err: None,
            exhausted: false,
        }
    }
}

#[async_trait]
impl RowSource for PgRowSource<'_> {
    type Row = PgRow;

    async fn next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        match self.stream.try_next().await {
            Ok(Some(row)) => {
                self.current = Some(row);
                true
            }
            Ok(None) => {
                self.current = None;
                self.exhausted = true;
                false
            }
            Err(e) => {
                self.current = None;
                self.err = Some(e);
                self.exhausted = true;
                false
            }
        }
    }

    fn current(&self) -> Option<&PgRow> {
        self.current.as_ref()
    }

    fn err(&mut self) -> Option<sqlx::Error> {
        self.err.take()
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.current = None;
        if self.exhausted {
            return Ok(());
        }
        self.exhausted = true;
        while self.stream.try_next().await?.is_some() {}
        Ok(())
    }
}

impl ScanRow for PgRow {
    fn try_text(&self, idx: usize) -> Result<Option<String>, sqlx::Error> {
        self.try_get::<Option<String>, _>(idx)
    }

    fn try_bool(&self, idx: usize) -> Result<Option<bool>, sqlx::Error> {
        self.try_get::<Option<bool>, _>(idx)
    }

    fn try_int(&self, idx: usize) -> Result<Option<i64>, sqlx::Error> {
        self.try_get::<Option<i64>, _>(idx)
    }

    fn try_timestamp(&self, idx: usize) -> Result<Option<Timestamp>, sqlx::Error> {
        self.try_get::<Option<Timestamp>, _>(idx)
    }

    fn try_json(&self, idx: usize) -> Result<Option<serde_json::Value>, sqlx::Error> {
        self.try_get::<Option<serde_json::Value>, _>(idx)
    }
}
