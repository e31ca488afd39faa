//! Row Scanner: decodes row sources into typed entities.
//!
//! Flat decode turns one row into one entity, optionally followed by the
//! trailing `filtered_count, total_count` columns of a list query. Aggregate
//! decode turns one joined row into a parent and a child and regroups the
//! children under their parents in a single streaming pass.
//!
//! The aggregate pass requires rows for the same parent to be contiguous.
//! Queries compiled by [`crate::query_builder`] for a joined list always end
//! in an `ORDER BY` on the parent sort key and parent ID, which guarantees it.
//!
//! Every scan ends the same way: after the last row, the row source's
//! iteration error is checked, then the source is closed. Either failure is
//! returned. A row that fails to decode still gets its source drained and
//! closed before the scan error is returned.

use sqlx::error::UnexpectedNullError;
use tenantry_core::filter::{PaginatedResult, QueryFilter};
use tenantry_core::roles::split_delimited;
use tenantry_core::types::Timestamp;

use crate::error::{RepoError, RepoResult};
use crate::executor::BoxRows;

// ---------------------------------------------------------------------------
// ScanRow
// ---------------------------------------------------------------------------

/// Positional, typed access to one decoded row. `Ok(None)` means SQL NULL.
pub trait ScanRow: Send + Sync {
    fn try_text(&self, idx: usize) -> Result<Option<String>, sqlx::Error>;

    fn try_bool(&self, idx: usize) -> Result<Option<bool>, sqlx::Error>;

    fn try_int(&self, idx: usize) -> Result<Option<i64>, sqlx::Error>;

    fn try_timestamp(&self, idx: usize) -> Result<Option<Timestamp>, sqlx::Error>;

    fn try_json(&self, idx: usize) -> Result<Option<serde_json::Value>, sqlx::Error>;
}

// ---------------------------------------------------------------------------
// Columns cursor
// ---------------------------------------------------------------------------

/// Reads a row's columns left to right.
pub struct Columns<'r, R: ?Sized> {
    row: &'r R,
    next: usize,
}

impl<'r, R: ScanRow + ?Sized> Columns<'r, R> {
    pub fn new(row: &'r R) -> Self {
        Self { row, next: 0 }
    }

    /// Index of the next column to be read.
    pub fn position(&self) -> usize {
        self.next
    }

    fn advance(&mut self) -> usize {
        let idx = self.next;
        self.next += 1;
        idx
    }

    pub fn text(&mut self) -> Result<String, sqlx::Error> {
        let idx = self.advance();
        required(idx, self.row.try_text(idx)?)
    }

    pub fn opt_text(&mut self) -> Result<Option<String>, sqlx::Error> {
        let idx = self.advance();
        self.row.try_text(idx)
    }

    pub fn bool(&mut self) -> Result<bool, sqlx::Error> {
        let idx = self.advance();
        required(idx, self.row.try_bool(idx)?)
    }

    pub fn int(&mut self) -> Result<i64, sqlx::Error> {
        let idx = self.advance();
        required(idx, self.row.try_int(idx)?)
    }

    pub fn timestamp(&mut self) -> Result<Timestamp, sqlx::Error> {
        let idx = self.advance();
        required(idx, self.row.try_timestamp(idx)?)
    }

    pub fn opt_timestamp(&mut self) -> Result<Option<Timestamp>, sqlx::Error> {
        let idx = self.advance();
        self.row.try_timestamp(idx)
    }

    pub fn json(&mut self) -> Result<serde_json::Value, sqlx::Error> {
        let idx = self.advance();
        required(idx, self.row.try_json(idx)?)
    }

    /// A comma-delimited list column.
    pub fn delimited(&mut self) -> Result<Vec<String>, sqlx::Error> {
        Ok(split_delimited(&self.text()?))
    }

    /// A non-negative count column.
    pub fn count(&mut self) -> Result<u64, sqlx::Error> {
        let idx = self.position();
        let value = self.int()?;
        u64::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
            index: idx.to_string(),
            source: Box::new(e),
        })
    }

    /// An identifier column, accepting either text or integer keys.
    pub fn identifier(&mut self) -> Result<String, sqlx::Error> {
        let idx = self.advance();
        match self.row.try_text(idx) {
            Ok(value) => required(idx, value),
            Err(text_err) => match self.row.try_int(idx) {
                Ok(value) => required(idx, value).map(|v| v.to_string()),
                Err(_) => Err(text_err),
            },
        }
    }
}

fn required<T>(idx: usize, value: Option<T>) -> Result<T, sqlx::Error> {
    value.ok_or_else(|| sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: Box::new(UnexpectedNullError),
    })
}

// ---------------------------------------------------------------------------
// Scan / Aggregate
// ---------------------------------------------------------------------------

/// An entity decodable from a fixed, ordered set of columns.
pub trait Scan: Sized + Send {
    /// Entity name used in errors and logs.
    const ENTITY: &'static str;

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error>;
}

/// A parent entity reassembled from `(parent, child)` joined rows.
pub trait Aggregate: Scan {
    type Child: Scan;

    /// Identity compared between consecutive rows.
    fn identity(&self) -> &str;

    fn push_child(&mut self, child: Self::Child);
}

/// Decoded rows plus the list counts captured from the first row.
#[derive(Debug, Clone, PartialEq)]
pub struct Scanned<T> {
    pub items: Vec<T>,
    pub filtered_count: u64,
    pub total_count: u64,
}

impl<T> Scanned<T> {
    pub fn into_page(self, filter: Option<&QueryFilter>) -> PaginatedResult<T> {
        PaginatedResult::new(self.items, self.filtered_count, self.total_count, filter)
    }
}

// ---------------------------------------------------------------------------
// Scalar rows
// ---------------------------------------------------------------------------

/// Single boolean column, e.g. `SELECT EXISTS (...)`.
pub(crate) struct Flag(pub bool);

impl Scan for Flag {
    const ENTITY: &'static str = "boolean result";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Flag(cols.bool()?))
    }
}

/// Single count column.
pub(crate) struct Count(pub u64);

impl Scan for Count {
    const ENTITY: &'static str = "count";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Count(cols.count()?))
    }
}

/// Single identifier column, e.g. `RETURNING id`.
pub(crate) struct ReturnedId(pub String);

impl Scan for ReturnedId {
    const ENTITY: &'static str = "returned id";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(ReturnedId(cols.identifier()?))
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Decode the first row, if any. Remaining rows are drained on close.
pub async fn scan_optional<T, R>(mut rows: BoxRows<'_, R>) -> RepoResult<Option<T>>
where
    T: Scan,
    R: ScanRow,
{
    let mut found: Option<T> = None;
    for_each_row(&mut rows, T::ENTITY, |row| {
        if found.is_none() {
            found = Some(T::scan(&mut Columns::new(row))?);
        }
        Ok(())
    })
    .await?;
    Ok(found)
}

/// Decode exactly one entity; an empty result is `NotFound`.
pub async fn scan_one<T, R>(rows: BoxRows<'_, R>) -> RepoResult<T>
where
    T: Scan,
    R: ScanRow,
{
    scan_optional(rows)
        .await?
        .ok_or(RepoError::NotFound { what: T::ENTITY })
}

/// Decode every row into an entity, reading trailing counts when asked.
pub async fn scan_list<T, R>(mut rows: BoxRows<'_, R>, include_counts: bool) -> RepoResult<Scanned<T>>
where
    T: Scan,
    R: ScanRow,
{
    let mut items = Vec::new();
    let mut counts: Option<(u64, u64)> = None;

    for_each_row(&mut rows, T::ENTITY, |row| {
        let mut cols = Columns::new(row);
        items.push(T::scan(&mut cols)?);
        if include_counts && counts.is_none() {
            counts = Some((cols.count()?, cols.count()?));
        }
        Ok(())
    })
    .await?;

    let (filtered_count, total_count) = counts.unwrap_or((0, 0));
    Ok(Scanned {
        items,
        filtered_count,
        total_count,
    })
}

/// Regroup `(parent, child[, counts])` rows into parents with children.
///
/// A new parent starts whenever a row's parent identity differs from the
/// previous row's; the child is always appended to the current parent.
pub async fn scan_aggregates<P, R>(
    mut rows: BoxRows<'_, R>,
    include_counts: bool,
) -> RepoResult<Scanned<P>>
where
    P: Aggregate,
    R: ScanRow,
{
    let mut parents: Vec<P> = Vec::new();
    let mut current: Option<P> = None;
    let mut counts: Option<(u64, u64)> = None;

    for_each_row(&mut rows, P::ENTITY, |row| {
        let mut cols = Columns::new(row);
        let parent = P::scan(&mut cols)?;
        let child = P::Child::scan(&mut cols)?;
        if include_counts && counts.is_none() {
            counts = Some((cols.count()?, cols.count()?));
        }

        let same_parent = current
            .as_ref()
            .is_some_and(|c| c.identity() == parent.identity());
        if !same_parent {
            if let Some(done) = current.replace(parent) {
                parents.push(done);
            }
        }
        if let Some(c) = current.as_mut() {
            c.push_child(child);
        }
        Ok(())
    })
    .await?;

    if let Some(last) = current {
        parents.push(last);
    }

    let (filtered_count, total_count) = counts.unwrap_or((0, 0));
    Ok(Scanned {
        items: parents,
        filtered_count,
        total_count,
    })
}

/// Decode one aggregate; no rows is `NotFound`.
pub async fn scan_aggregate<P, R>(rows: BoxRows<'_, R>) -> RepoResult<P>
where
    P: Aggregate,
    R: ScanRow,
{
    scan_aggregates::<P, R>(rows, false)
        .await?
        .items
        .into_iter()
        .next()
        .ok_or(RepoError::NotFound { what: P::ENTITY })
}

/// Drive a row source to the end, then check its error and close it.
async fn for_each_row<R, F>(
    rows: &mut BoxRows<'_, R>,
    entity: &'static str,
    mut each: F,
) -> RepoResult<()>
where
    R: ScanRow,
    F: FnMut(&R) -> Result<(), sqlx::Error> + Send,
{
    while rows.next().await {
        let decoded = match rows.current() {
            Some(row) => each(row),
            None => Ok(()),
        };
        if let Err(source) = decoded {
            if let Err(close_err) = rows.close().await {
                tracing::error!(entity, error = %close_err, "Failed to close rows after scan error");
            }
            return Err(RepoError::Scan { entity, source });
        }
    }
    finish(rows, entity).await
}

async fn finish<R: ScanRow>(rows: &mut BoxRows<'_, R>, entity: &'static str) -> RepoResult<()> {
    let iteration = rows.err();
    let closed = rows.close().await;

    match (iteration, closed) {
        (None, Ok(())) => Ok(()),
        (None, Err(source)) => Err(RepoError::Close { entity, source }),
        (Some(source), Ok(())) => Err(RepoError::Iteration { entity, source }),
        (Some(source), Err(close_err)) => {
            tracing::error!(entity, error = %close_err, "Failed to close rows after iteration error");
            Err(RepoError::Iteration { entity, source })
        }
    }
}
