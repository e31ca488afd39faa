//! Query Builder: compiles a typed [`QuerySpec`] into SQL text plus
//! positional arguments.
//!
//! Four read shapes are supported: point existence, point fetch (optionally
//! joined to one child table), filtered/paginated list (optionally joined)
//! and scalar count. An unpaged `Select` covers lookups such as "items with
//! these IDs" and per-entity audit history.
//!
//! Predicates are applied in a fixed order:
//!
//! 1. base predicates (entity ID, caller-supplied predicates)
//! 2. owner predicate
//! 3. archived predicate (unless the filter includes archived rows)
//! 4. time-range predicates
//! 5. sort, then limit/offset
//!
//! Placeholders are numbered in the order their values are pushed, and the
//! text is assembled in the same order, so the count subqueries (which come
//! first in the select list) consume the lowest-numbered arguments.

use tenantry_core::error::ValidationError;
use tenantry_core::filter::{QueryFilter, SortOrder, DEFAULT_LIMIT};

use crate::executor::SqlValue;

// ---------------------------------------------------------------------------
// Table metadata
// ---------------------------------------------------------------------------

/// Static description of a table the builder can query.
#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    /// Select-list columns, in decode order. The first is the primary key.
    pub columns: &'static [&'static str],
    /// Field name reported when an empty entity ID is supplied.
    pub id_field: &'static str,
    pub created_column: &'static str,
    pub updated_column: Option<&'static str>,
    pub archived_column: Option<&'static str>,
}

impl Table {
    /// Comma-separated, table-qualified select list.
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{c}", self.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Owner-scope column and the field name reported when its value is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub column: &'static str,
    pub field: &'static str,
}

/// One-to-many join from a parent table to a child table.
#[derive(Debug)]
pub struct ChildJoin {
    pub child: &'static Table,
    /// Column on the child referencing the parent's `id`.
    pub foreign_key: &'static str,
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Extra base predicate applied before the owner and archived predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, SqlValue),
    /// `column = ANY($n)` over a text array.
    AnyOf(&'static str, Vec<String>),
    ILike(&'static str, String),
    /// `column->>'key' = $n` on a JSON column.
    JsonKeyEq {
        column: &'static str,
        key: &'static str,
        value: String,
    },
    IsNull(&'static str),
    IsNotNull(&'static str),
}

impl Predicate {
    fn render(&self, table: &str, args: &mut Args) -> String {
        match self {
            Predicate::Eq(col, value) => format!("{table}.{col} = {}", args.push(value.clone())),
            Predicate::AnyOf(col, values) => {
                format!("{table}.{col} = ANY({})", args.push(values.clone()))
            }
            Predicate::ILike(col, pattern) => {
                format!("{table}.{col} ILIKE {}", args.push(pattern.as_str()))
            }
            Predicate::JsonKeyEq { column, key, value } => {
                format!("{table}.{column}->>'{key}' = {}", args.push(value.as_str()))
            }
            Predicate::IsNull(col) => format!("{table}.{col} IS NULL"),
            Predicate::IsNotNull(col) => format!("{table}.{col} IS NOT NULL"),
        }
    }
}

// ---------------------------------------------------------------------------
// QuerySpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Exists,
    Get,
    List,
    Select { limit: Option<u32> },
    Count,
}

/// Typed description of a read query, consumed by [`compile`].
#[derive(Debug, Clone)]
pub struct QuerySpec<'a> {
    table: &'a Table,
    shape: Shape,
    id: Option<&'a str>,
    owner: Option<(Owner, &'a str)>,
    predicates: Vec<Predicate>,
    join: Option<&'a ChildJoin>,
    filter: Option<&'a QueryFilter>,
}

impl<'a> QuerySpec<'a> {
    fn new(table: &'a Table, shape: Shape) -> Self {
        Self {
            table,
            shape,
            id: None,
            owner: None,
            predicates: Vec::new(),
            join: None,
            filter: None,
        }
    }

    /// `SELECT EXISTS (...)` for one non-archived row.
    pub fn exists(table: &'a Table, id: &'a str) -> Self {
        let mut spec = Self::new(table, Shape::Exists);
        spec.id = Some(id);
        spec
    }

    /// `SELECT EXISTS (...)` for non-archived rows matching predicates only.
    pub fn any(table: &'a Table) -> Self {
        Self::new(table, Shape::Exists)
    }

    /// Fetch one non-archived row by ID.
    pub fn get(table: &'a Table, id: &'a str) -> Self {
        let mut spec = Self::new(table, Shape::Get);
        spec.id = Some(id);
        spec
    }

    /// Fetch non-archived rows matching predicates only.
    pub fn find(table: &'a Table) -> Self {
        Self::new(table, Shape::Get)
    }

    /// Paginated list with trailing filtered/total count columns.
    pub fn list(table: &'a Table, filter: Option<&'a QueryFilter>) -> Self {
        let mut spec = Self::new(table, Shape::List);
        spec.filter = filter;
        spec
    }

    /// Unpaged select ordered by creation time, ascending.
    pub fn select(table: &'a Table) -> Self {
        Self::new(table, Shape::Select { limit: None })
    }

    /// `SELECT COUNT(id)` over non-archived rows.
    pub fn count(table: &'a Table) -> Self {
        Self::new(table, Shape::Count)
    }

    pub fn owned_by(mut self, owner: Owner, value: &'a str) -> Self {
        self.owner = Some((owner, value));
        self
    }

    pub fn filter_by(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn joined(mut self, join: &'a ChildJoin) -> Self {
        self.join = Some(join);
        self
    }

    /// Cap an unpaged select. Ignored by other shapes.
    pub fn limit(mut self, limit: u32) -> Self {
        if let Shape::Select { .. } = self.shape {
            self.shape = Shape::Select { limit: Some(limit) };
        }
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = self.id {
            ValidationError::require_id(self.table.id_field, id)?;
        }
        if let Some((owner, value)) = self.owner {
            ValidationError::require_id(owner.field, value)?;
        }
        Ok(())
    }
}

/// SQL text plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a spec. Empty entity or owner IDs are rejected before any SQL is
/// built; every other input produces a query.
pub fn compile(spec: &QuerySpec<'_>) -> Result<CompiledQuery, ValidationError> {
    spec.validate()?;

    let mut args = Args::default();
    let sql = match (spec.shape, spec.join) {
        (Shape::Exists, _) => compile_exists(spec, &mut args),
        (Shape::Get, None) => compile_get(spec, &mut args),
        (Shape::Get, Some(join)) => compile_joined_get(spec, join, &mut args),
        (Shape::List, None) => compile_list(spec, &mut args),
        (Shape::List, Some(join)) => compile_joined_list(spec, join, &mut args),
        (Shape::Select { limit }, _) => compile_select(spec, limit, &mut args),
        (Shape::Count, _) => compile_count(spec, &mut args),
    };

    Ok(CompiledQuery {
        sql,
        args: args.into_values(),
    })
}

/// Positional argument accumulator. `push` returns the placeholder.
#[derive(Debug, Default)]
struct Args(Vec<SqlValue>);

impl Args {
    fn push(&mut self, value: impl Into<SqlValue>) -> String {
        self.0.push(value.into());
        format!("${}", self.0.len())
    }

    fn into_values(self) -> Vec<SqlValue> {
        self.0
    }
}

/// Effective list parameters. A missing filter means page 1, default limit,
/// archived rows excluded, descending by creation.
struct ListParams {
    include_archived: bool,
    sort: SortOrder,
    limit: u32,
    offset: u64,
}

impl ListParams {
    fn from_filter(filter: Option<&QueryFilter>) -> Self {
        match filter {
            Some(f) => Self {
                include_archived: f.include_archived(),
                sort: f.sort_by(),
                limit: f.limit(),
                offset: f.offset(),
            },
            None => Self {
                include_archived: false,
                sort: SortOrder::Descending,
                limit: DEFAULT_LIMIT,
                offset: 0,
            },
        }
    }
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// Base, owner and archived predicates, in that order.
fn scope_conditions(spec: &QuerySpec<'_>, args: &mut Args, include_archived: bool) -> Vec<String> {
    let table = spec.table.name;
    let mut conditions = Vec::new();

    if let Some(id) = spec.id {
        conditions.push(format!("{table}.id = {}", args.push(id)));
    }
    for predicate in &spec.predicates {
        conditions.push(predicate.render(table, args));
    }
    if let Some((owner, value)) = spec.owner {
        conditions.push(format!("{table}.{} = {}", owner.column, args.push(value)));
    }
    if !include_archived {
        if let Some(archived) = spec.table.archived_column {
            conditions.push(format!("{table}.{archived} IS NULL"));
        }
    }

    conditions
}

fn time_conditions(table: &Table, filter: Option<&QueryFilter>, args: &mut Args) -> Vec<String> {
    let Some(filter) = filter else {
        return Vec::new();
    };

    let name = table.name;
    let created = table.created_column;
    let mut conditions = Vec::new();

    if let Some(at) = filter.created_after() {
        conditions.push(format!("{name}.{created} > {}", args.push(at)));
    }
    if let Some(at) = filter.created_before() {
        conditions.push(format!("{name}.{created} < {}", args.push(at)));
    }
    if let Some(updated) = table.updated_column {
        if let Some(at) = filter.updated_after() {
            conditions.push(format!("{name}.{updated} > {}", args.push(at)));
        }
        if let Some(at) = filter.updated_before() {
            conditions.push(format!("{name}.{updated} < {}", args.push(at)));
        }
    }

    conditions
}

fn filtered_conditions(spec: &QuerySpec<'_>, args: &mut Args, params: &ListParams) -> Vec<String> {
    let mut conditions = scope_conditions(spec, args, params.include_archived);
    conditions.extend(time_conditions(spec.table, spec.filter, args));
    conditions
}

/// The two trailing count columns. Total ignores time bounds but keeps the
/// owner scope and archive inclusion, so `total_count >= filtered_count`.
fn count_columns(spec: &QuerySpec<'_>, args: &mut Args, params: &ListParams) -> String {
    let table = spec.table.name;

    let filtered = filtered_conditions(spec, args, params);
    let filtered_sql = format!(
        "(SELECT COUNT({table}.id) FROM {table}{}) AS filtered_count",
        where_clause(&filtered)
    );

    let total = scope_conditions(spec, args, params.include_archived);
    let total_sql = format!(
        "(SELECT COUNT({table}.id) FROM {table}{}) AS total_count",
        where_clause(&total)
    );

    format!("{filtered_sql}, {total_sql}")
}

fn compile_exists(spec: &QuerySpec<'_>, args: &mut Args) -> String {
    let table = spec.table.name;
    let conditions = scope_conditions(spec, args, false);
    format!(
        "SELECT EXISTS ( SELECT {table}.id FROM {table}{} )",
        where_clause(&conditions)
    )
}

fn compile_get(spec: &QuerySpec<'_>, args: &mut Args) -> String {
    let conditions = scope_conditions(spec, args, false);
    format!(
        "SELECT {} FROM {}{}",
        spec.table.select_list(),
        spec.table.name,
        where_clause(&conditions)
    )
}

fn compile_joined_get(spec: &QuerySpec<'_>, join: &ChildJoin, args: &mut Args) -> String {
    let parent = spec.table.name;
    let child = join.child;

    let mut conditions = scope_conditions(spec, args, false);
    if let Some(archived) = child.archived_column {
        conditions.push(format!("{}.{archived} IS NULL", child.name));
    }

    format!(
        "SELECT {}, {} FROM {parent} JOIN {c} ON {c}.{fk} = {parent}.id{} ORDER BY {c}.{created} ASC, {c}.id ASC",
        spec.table.select_list(),
        child.select_list(),
        where_clause(&conditions),
        c = child.name,
        fk = join.foreign_key,
        created = child.created_column,
    )
}

fn compile_list(spec: &QuerySpec<'_>, args: &mut Args) -> String {
    let table = spec.table.name;
    let created = spec.table.created_column;
    let params = ListParams::from_filter(spec.filter);

    let counts = count_columns(spec, args, &params);
    let conditions = filtered_conditions(spec, args, &params);
    let dir = params.sort.as_sql();

    format!(
        "SELECT {}, {counts} FROM {table}{} ORDER BY {table}.{created} {dir}, {table}.id {dir} LIMIT {} OFFSET {}",
        spec.table.select_list(),
        where_clause(&conditions),
        params.limit,
        params.offset,
    )
}

/// Pages parents in a derived table, then joins their children. The outer
/// `ORDER BY` keeps each parent's rows contiguous for aggregate decoding.
fn compile_joined_list(spec: &QuerySpec<'_>, join: &ChildJoin, args: &mut Args) -> String {
    let parent = spec.table.name;
    let created = spec.table.created_column;
    let child = join.child;
    let params = ListParams::from_filter(spec.filter);
    let dir = params.sort.as_sql();

    let counts = count_columns(spec, args, &params);
    let conditions = filtered_conditions(spec, args, &params);
    let page = format!(
        "SELECT {}, {counts} FROM {parent}{} ORDER BY {parent}.{created} {dir}, {parent}.id {dir} LIMIT {} OFFSET {}",
        spec.table.select_list(),
        where_clause(&conditions),
        params.limit,
        params.offset,
    );

    let child_archived = child
        .archived_column
        .map(|archived| format!(" WHERE {}.{archived} IS NULL", child.name))
        .unwrap_or_default();

    format!(
        "SELECT {}, {}, {parent}.filtered_count, {parent}.total_count \
         FROM ({page}) AS {parent} \
         JOIN {c} ON {c}.{fk} = {parent}.id{child_archived} \
         ORDER BY {parent}.{created} {dir}, {parent}.id {dir}, {c}.{c_created} ASC, {c}.id ASC",
        spec.table.select_list(),
        child.select_list(),
        c = child.name,
        fk = join.foreign_key,
        c_created = child.created_column,
    )
}

fn compile_select(spec: &QuerySpec<'_>, limit: Option<u32>, args: &mut Args) -> String {
    let table = spec.table.name;
    let created = spec.table.created_column;
    let conditions = scope_conditions(spec, args, false);
    let limit = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();

    format!(
        "SELECT {} FROM {table}{} ORDER BY {table}.{created} ASC, {table}.id ASC{limit}",
        spec.table.select_list(),
        where_clause(&conditions),
    )
}

fn compile_count(spec: &QuerySpec<'_>, args: &mut Args) -> String {
    let table = spec.table.name;
    let conditions = scope_conditions(spec, args, false);
    format!("SELECT COUNT({table}.id) FROM {table}{}", where_clause(&conditions))
}
