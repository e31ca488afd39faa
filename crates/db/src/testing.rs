//! Scripted in-memory `Database` used by unit tests.
//!
//! Every call is recorded as an event string (`begin`, `exec <sql>`,
//! `query <sql>`, `commit`, `rollback`, `ping`, `migrate`). Exec and query
//! results are popped from queues; an empty exec queue answers `Ok(1)` and an
//! empty query queue answers with no rows.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use tenantry_core::types::Timestamp;

use crate::executor::{BoxRows, Database, Executor, RowSource, SqlValue, Transaction};
use crate::rows::ScanRow;

macro_rules! row {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::executor::SqlValue::from($value)),*]
    };
}
pub(crate) use row;

// ---------------------------------------------------------------------------
// FakeRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct FakeRow(pub Vec<SqlValue>);

impl FakeRow {
    fn value(&self, idx: usize) -> Result<&SqlValue, sqlx::Error> {
        self.0.get(idx).ok_or(sqlx::Error::ColumnIndexOutOfBounds {
            index: idx,
            len: self.0.len(),
        })
    }
}

fn mismatch(idx: usize, expected: &str, found: &SqlValue) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: format!("expected {expected}, found {found:?}").into(),
    }
}

fn is_null(value: &SqlValue) -> bool {
    matches!(
        value,
        SqlValue::NullableText(None) | SqlValue::NullableTimestamp(None)
    )
}

impl ScanRow for FakeRow {
    fn try_text(&self, idx: usize) -> Result<Option<String>, sqlx::Error> {
        match self.value(idx)? {
            SqlValue::Text(v) => Ok(Some(v.clone())),
            SqlValue::NullableText(v) => Ok(v.clone()),
            v if is_null(v) => Ok(None),
            other => Err(mismatch(idx, "text", other)),
        }
    }

    fn try_bool(&self, idx: usize) -> Result<Option<bool>, sqlx::Error> {
        match self.value(idx)? {
            SqlValue::Bool(v) => Ok(Some(*v)),
            v if is_null(v) => Ok(None),
            other => Err(mismatch(idx, "bool", other)),
        }
    }

    fn try_int(&self, idx: usize) -> Result<Option<i64>, sqlx::Error> {
        match self.value(idx)? {
            SqlValue::BigInt(v) => Ok(Some(*v)),
            v if is_null(v) => Ok(None),
            other => Err(mismatch(idx, "bigint", other)),
        }
    }

    fn try_timestamp(&self, idx: usize) -> Result<Option<Timestamp>, sqlx::Error> {
        match self.value(idx)? {
            SqlValue::Timestamp(v) => Ok(Some(*v)),
            SqlValue::NullableTimestamp(v) => Ok(*v),
            v if is_null(v) => Ok(None),
            other => Err(mismatch(idx, "timestamp", other)),
        }
    }

    fn try_json(&self, idx: usize) -> Result<Option<serde_json::Value>, sqlx::Error> {
        match self.value(idx)? {
            SqlValue::Json(v) => Ok(Some(v.clone())),
            v if is_null(v) => Ok(None),
            other => Err(mismatch(idx, "json", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRows
// ---------------------------------------------------------------------------

pub(crate) struct FakeRows {
    rows: VecDeque<FakeRow>,
    current: Option<FakeRow>,
    iteration_error: Option<sqlx::Error>,
    err: Option<sqlx::Error>,
    close_error: Option<sqlx::Error>,
    closed: Arc<AtomicBool>,
}

/// Observes a `FakeRows` after it has been boxed and consumed.
#[derive(Clone)]
pub(crate) struct CloseTracker {
    closed: Arc<AtomicBool>,
}

impl CloseTracker {
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FakeRows {
    pub fn new(rows: Vec<Vec<SqlValue>>) -> (Self, CloseTracker) {
        let closed = Arc::new(AtomicBool::new(false));
        let rows = Self {
            rows: rows.into_iter().map(FakeRow).collect(),
            current: None,
            iteration_error: None,
            err: None,
            close_error: None,
            closed: Arc::clone(&closed),
        };
        (rows, CloseTracker { closed })
    }

    /// Fail with `err` once the scripted rows are exhausted.
    pub fn failing_iteration(mut self, err: sqlx::Error) -> Self {
        self.iteration_error = Some(err);
        self
    }

    pub fn failing_close(mut self, err: sqlx::Error) -> Self {
        self.close_error = Some(err);
        self
    }
}

#[async_trait]
impl RowSource for FakeRows {
    type Row = FakeRow;

    async fn next(&mut self) -> bool {
        match self.rows.pop_front() {
            Some(row) => {
                self.current = Some(row);
                true
            }
            None => {
                self.current = None;
                if let Some(err) = self.iteration_error.take() {
                    self.err = Some(err);
                }
                false
            }
        }
    }

    fn current(&self) -> Option<&FakeRow> {
        self.current.as_ref()
    }

    fn err(&mut self) -> Option<sqlx::Error> {
        self.err.take()
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.closed.store(true, Ordering::SeqCst);
        self.rows.clear();
        self.current = None;
        match self.close_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeDatabase
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    events: Vec<String>,
    exec_results: VecDeque<Result<u64, sqlx::Error>>,
    query_results: VecDeque<Result<Vec<Vec<SqlValue>>, sqlx::Error>>,
    exec_delay: Option<Duration>,
    begin_error: Option<sqlx::Error>,
    commit_error: Option<sqlx::Error>,
    rollback_error: Option<sqlx::Error>,
    ping_failures: u32,
    migration_error: Option<MigrateError>,
    migration_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDatabase {
    state: Arc<Mutex<State>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Number of recorded events equal to `event`.
    pub fn count(&self, event: &str) -> usize {
        self.lock().events.iter().filter(|e| *e == event).count()
    }

    pub fn push_exec(&self, result: Result<u64, sqlx::Error>) {
        self.lock().exec_results.push_back(result);
    }

    pub fn push_rows(&self, rows: Vec<Vec<SqlValue>>) {
        self.lock().query_results.push_back(Ok(rows));
    }

    pub fn push_query_error(&self, err: sqlx::Error) {
        self.lock().query_results.push_back(Err(err));
    }

    pub fn delay_execs(&self, delay: Duration) {
        self.lock().exec_delay = Some(delay);
    }

    pub fn fail_begin(&self, err: sqlx::Error) {
        self.lock().begin_error = Some(err);
    }

    pub fn fail_commit(&self, err: sqlx::Error) {
        self.lock().commit_error = Some(err);
    }

    pub fn fail_rollback(&self, err: sqlx::Error) {
        self.lock().rollback_error = Some(err);
    }

    pub fn fail_pings(&self, times: u32) {
        self.lock().ping_failures = times;
    }

    pub fn fail_migration(&self, err: MigrateError) {
        self.lock().migration_error = Some(err);
    }

    pub fn delay_migration(&self, delay: Duration) {
        self.lock().migration_delay = Some(delay);
    }
}

fn record(state: &Mutex<State>, event: String) {
    state.lock().unwrap().events.push(event);
}

async fn fake_exec(state: &Mutex<State>, sql: &str) -> Result<u64, sqlx::Error> {
    let delay = {
        let mut s = state.lock().unwrap();
        s.events.push(format!("exec {sql}"));
        s.exec_delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    state
        .lock()
        .unwrap()
        .exec_results
        .pop_front()
        .unwrap_or(Ok(1))
}

fn fake_query(state: &Mutex<State>, sql: &str) -> FakeRows {
    let mut s = state.lock().unwrap();
    s.events.push(format!("query {sql}"));
    match s.query_results.pop_front() {
        Some(Ok(rows)) => FakeRows::new(rows).0,
        Some(Err(err)) => FakeRows::new(Vec::new()).0.failing_iteration(err),
        None => FakeRows::new(Vec::new()).0,
    }
}

pub(crate) struct FakeConn {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Executor for FakeConn {
    type Row = FakeRow;

    async fn exec(&mut self, sql: &str, _args: &[SqlValue]) -> Result<u64, sqlx::Error> {
        fake_exec(&self.state, sql).await
    }

    fn query<'e>(&'e mut self, sql: &'e str, _args: &'e [SqlValue]) -> BoxRows<'e, FakeRow> {
        Box::new(fake_query(&self.state, sql))
    }
}

pub(crate) struct FakeTx {
    state: Arc<Mutex<State>>,
    finished: bool,
}

#[async_trait]
impl Executor for FakeTx {
    type Row = FakeRow;

    async fn exec(&mut self, sql: &str, _args: &[SqlValue]) -> Result<u64, sqlx::Error> {
        fake_exec(&self.state, sql).await
    }

    fn query<'e>(&'e mut self, sql: &'e str, _args: &'e [SqlValue]) -> BoxRows<'e, FakeRow> {
        Box::new(fake_query(&self.state, sql))
    }
}

#[async_trait]
impl Transaction for FakeTx {
    async fn commit(mut self) -> Result<(), sqlx::Error> {
        self.finished = true;
        record(&self.state, "commit".into());
        match self.state.lock().unwrap().commit_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(mut self) -> Result<(), sqlx::Error> {
        self.finished = true;
        record(&self.state, "rollback".into());
        match self.state.lock().unwrap().rollback_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for FakeTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Ok(mut s) = self.state.lock() {
                s.events.push("rollback on drop".into());
            }
        }
    }
}

#[async_trait]
impl Database for FakeDatabase {
    type Row = FakeRow;
    type Conn = FakeConn;
    type Tx = FakeTx;

    fn connection(&self) -> FakeConn {
        FakeConn {
            state: Arc::clone(&self.state),
        }
    }

    async fn begin(&self) -> Result<FakeTx, sqlx::Error> {
        let mut s = self.lock();
        s.events.push("begin".into());
        if let Some(err) = s.begin_error.take() {
            return Err(err);
        }
        Ok(FakeTx {
            state: Arc::clone(&self.state),
            finished: false,
        })
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let mut s = self.lock();
        s.events.push("ping".into());
        if s.ping_failures > 0 {
            s.ping_failures -= 1;
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }

    async fn apply_migrations(&self) -> Result<(), MigrateError> {
        let delay = {
            let mut s = self.lock();
            s.events.push("migrate".into());
            s.migration_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.lock().migration_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
