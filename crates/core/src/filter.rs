//! Pagination, time-range, sort and archive-inclusion parameters for list
//! queries, plus the paginated result envelope.
//!
//! A `QueryFilter` is immutable once built. Out-of-range values are coerced
//! to documented defaults rather than rejected, so list operations stay total:
//!
//! | Input            | Coerced to      |
//! |------------------|-----------------|
//! | `page = 0`       | `1`             |
//! | `limit = 0`      | `DEFAULT_LIMIT` |
//! | `limit > MAX`    | `MAX_LIMIT`     |
//!
//! An absent filter (`None`) means page 1, default limit, archived rows
//! excluded and no time bounds. Consumers handle `None` themselves.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Page size used when none (or zero) is requested.
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest page size a caller may request.
pub const MAX_LIMIT: u32 = 250;

// ---------------------------------------------------------------------------
// SortOrder
// ---------------------------------------------------------------------------

/// Direction of the creation-time sort applied to list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    /// SQL keyword for this direction.
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Immutable list-query parameters. Build with [`QueryFilter::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QueryFilterBuilder")]
pub struct QueryFilter {
    page: u32,
    limit: u32,
    created_after: Option<Timestamp>,
    created_before: Option<Timestamp>,
    updated_after: Option<Timestamp>,
    updated_before: Option<Timestamp>,
    sort_by: SortOrder,
    include_archived: bool,
}

impl Default for QueryFilter {
    fn default() -> Self {
        QueryFilterBuilder::default().build()
    }
}

impl QueryFilter {
    pub fn builder() -> QueryFilterBuilder {
        QueryFilterBuilder::default()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of rows skipped before the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn created_after(&self) -> Option<Timestamp> {
        self.created_after
    }

    pub fn created_before(&self) -> Option<Timestamp> {
        self.created_before
    }

    pub fn updated_after(&self) -> Option<Timestamp> {
        self.updated_after
    }

    pub fn updated_before(&self) -> Option<Timestamp> {
        self.updated_before
    }

    pub fn sort_by(&self) -> SortOrder {
        self.sort_by
    }

    pub fn include_archived(&self) -> bool {
        self.include_archived
    }

    /// True when any of the four time bounds is set.
    pub fn has_time_bounds(&self) -> bool {
        self.created_after.is_some()
            || self.created_before.is_some()
            || self.updated_after.is_some()
            || self.updated_before.is_some()
    }
}

/// Builder for [`QueryFilter`]. Coercion happens in [`build`](Self::build).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryFilterBuilder {
    page: Option<u32>,
    limit: Option<u32>,
    created_after: Option<Timestamp>,
    created_before: Option<Timestamp>,
    updated_after: Option<Timestamp>,
    updated_before: Option<Timestamp>,
    sort_by: Option<SortOrder>,
    include_archived: Option<bool>,
}

impl QueryFilterBuilder {
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn created_after(mut self, at: Timestamp) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: Timestamp) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn updated_after(mut self, at: Timestamp) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn updated_before(mut self, at: Timestamp) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn sort_by(mut self, order: SortOrder) -> Self {
        self.sort_by = Some(order);
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = Some(include);
        self
    }

    pub fn build(self) -> QueryFilter {
        let page = match self.page {
            None | Some(0) => 1,
            Some(p) => p,
        };
        let limit = match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(l) => l.min(MAX_LIMIT),
        };

        QueryFilter {
            page,
            limit,
            created_after: self.created_after,
            created_before: self.created_before,
            updated_after: self.updated_after,
            updated_before: self.updated_before,
            sort_by: self.sort_by.unwrap_or_default(),
            include_archived: self.include_archived.unwrap_or(false),
        }
    }
}

impl From<QueryFilterBuilder> for QueryFilter {
    fn from(builder: QueryFilterBuilder) -> Self {
        builder.build()
    }
}

// ---------------------------------------------------------------------------
// PaginatedResult
// ---------------------------------------------------------------------------

/// One page of results plus the counts needed to render pagination.
///
/// `filtered_count` counts rows matching the filter; `total_count` counts all
/// rows in the owner scope regardless of time bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub filtered_count: u64,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> PaginatedResult<T> {
    /// Wrap a page of items, echoing the effective page and limit.
    pub fn new(
        items: Vec<T>,
        filtered_count: u64,
        total_count: u64,
        filter: Option<&QueryFilter>,
    ) -> Self {
        let (page, limit) = match filter {
            Some(f) => (f.page(), f.limit()),
            None => (1, DEFAULT_LIMIT),
        };
        Self {
            items,
            filtered_count,
            total_count,
            page,
            limit,
        }
    }
}
