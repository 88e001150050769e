//! # Storage Options
//!
//! Translates a [`QueryParameterModel`] into the limit/offset/order/filter
//! directives a data-access layer consumes, and turns the rows it returns
//! back into a page.
//!
//! `limit` is always one more than the page size. The extra row only tells
//! the caller whether another page exists; [`Page::from_rows`] drops it.

use crate::database::DbValue;
use crate::query::{
    Operator, QueryParameterDirective, QueryParameterModel, QueryValue, SortDirective, ValueKinds,
};
use serde::Serialize;
use std::fmt::Write as _;

/// Header carrying the `{"has_more": bool}` pagination marker
pub const PAGINATION_HEADER: &str = "X-Pagination";

/// Options handed to a storage query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// Rows to fetch (`page_size + 1`)
    pub limit: u64,
    /// Rows to skip (`(page_number - 1) * page_size`)
    pub offset: u64,
    /// Ordering, outermost first
    pub order_by: Vec<SortDirective>,
    /// Filters
    pub params: Vec<QueryParameterDirective>,
    /// Declared kinds of filter columns; undeclared columns bind as text
    pub kinds: ValueKinds,
}

impl StorageOptions {
    /// Type filter values by `kinds`
    #[must_use]
    pub fn with_kinds(mut self, kinds: ValueKinds) -> Self {
        self.kinds = kinds;
        self
    }

    /// Page size the options were built for
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.limit.saturating_sub(1)
    }
}

/// Build storage options from a parsed query
#[must_use]
pub fn to_storage_options(model: &QueryParameterModel) -> StorageOptions {
    let page_size = u64::from(model.page.page_size);
    let page_number = u64::from(model.page.page_number);
    StorageOptions {
        limit: page_size + 1,
        offset: page_number.saturating_sub(1) * page_size,
        order_by: model.sort.clone(),
        params: model.filters.clone(),
        kinds: ValueKinds::new(),
    }
}

/// Pagination marker serialized into the `X-Pagination` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Whether a later page exists
    pub has_more: bool,
}

impl Pagination {
    /// Header value (`{"has_more":true}`)
    #[must_use]
    pub fn header_value(self) -> String {
        serde_json::to_string(&self).unwrap_or_default()
    }
}

/// One page of rows with its pagination marker
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// At most `page_size` rows
    pub items: Vec<T>,
    /// Pagination marker
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with [`StorageOptions::limit`]
    ///
    /// More than `page_size` rows means the sentinel row was returned; it is
    /// dropped and `has_more` is set.
    #[must_use]
    pub fn from_rows(mut rows: Vec<T>, page_size: u64) -> Self {
        let size = usize::try_from(page_size).unwrap_or(usize::MAX);
        let has_more = rows.len() > size;
        rows.truncate(size);
        Self {
            items: rows,
            pagination: Pagination { has_more },
        }
    }

    /// Build a page using the page size carried by `options`
    #[must_use]
    pub fn for_options(rows: Vec<T>, options: &StorageOptions) -> Self {
        Self::from_rows(rows, options.page_size())
    }
}

/// SQL flavour of a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$n` placeholders, native `ILIKE`
    Postgres,
    /// `?` placeholders; `LIKE` is case-insensitive for ASCII, so
    /// case-sensitive patterns render as `GLOB`
    Sqlite,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            Self::Sqlite => "?".to_string(),
        }
    }

    const fn comparison(self, operator: Operator) -> &'static str {
        match operator {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Like => match self {
                Self::Postgres => "LIKE",
                Self::Sqlite => "GLOB",
            },
            Operator::CaseInsensitiveLike => match self {
                Self::Postgres => "ILIKE",
                Self::Sqlite => "LIKE",
            },
        }
    }
}

/// A rendered statement with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// SQL text
    pub sql: String,
    /// Values bound in placeholder order
    pub params: Vec<DbValue>,
}

struct Binder<'a> {
    dialect: Dialect,
    kinds: &'a ValueKinds,
    params: Vec<DbValue>,
}

impl Binder<'_> {
    fn bind(&mut self, value: DbValue) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn bind_filter(&mut self, column: &str, operator: Operator, raw: &str) -> String {
        let value = match (operator, self.dialect) {
            (Operator::Like, Dialect::Sqlite) => DbValue::String(like_to_glob(raw)),
            (Operator::Like | Operator::CaseInsensitiveLike, _) => DbValue::String(raw.to_string()),
            _ => DbValue::from_query(raw, self.kinds.kind_of(column)),
        };
        self.bind(value)
    }
}

/// Rewrite a `LIKE` pattern for SQLite `GLOB`
fn like_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => glob.push('*'),
            '_' => glob.push('?'),
            '*' | '?' | '[' => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            c => glob.push(c),
        }
    }
    glob
}

/// Render `SELECT * FROM table` with the filters, order, limit and offset of `options`
///
/// `table` is trusted; column names were validated when the query was parsed.
#[must_use]
pub fn render_select(table: &str, options: &StorageOptions, dialect: Dialect) -> SelectStatement {
    let mut binder = Binder {
        dialect,
        kinds: &options.kinds,
        params: Vec::new(),
    };
    let mut sql = format!("SELECT * FROM {table}");

    let conditions: Vec<String> = options
        .params
        .iter()
        .map(|directive| condition(directive, &mut binder))
        .collect();
    if !conditions.is_empty() {
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }

    if !options.order_by.is_empty() {
        let terms: Vec<String> = options
            .order_by
            .iter()
            .map(|s| format!("{} {}", s.column, if s.descending { "DESC" } else { "ASC" }))
            .collect();
        let _ = write!(sql, " ORDER BY {}", terms.join(", "));
    }

    let limit = binder.bind(DbValue::Int(i64::try_from(options.limit).unwrap_or(i64::MAX)));
    let offset = binder.bind(DbValue::Int(i64::try_from(options.offset).unwrap_or(i64::MAX)));
    let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");

    SelectStatement {
        sql,
        params: binder.params,
    }
}

fn condition(directive: &QueryParameterDirective, binder: &mut Binder<'_>) -> String {
    let column = &directive.column;
    let op = binder.dialect.comparison(directive.operator);
    match &directive.value {
        QueryValue::Single(value) => {
            let first = format!("{column} {op} {}", binder.bind_filter(column, directive.operator, value));
            match &directive.second_value {
                Some(upper) => {
                    let upper_op = binder.dialect.comparison(upper.operator);
                    let second = binder.bind_filter(column, upper.operator, &upper.value);
                    format!("({first} AND {column} {upper_op} {second})")
                }
                None => first,
            }
        }
        QueryValue::Multi(values) if values.is_empty() => match directive.operator {
            Operator::NotEquals => "1 = 1".to_string(),
            _ => "1 = 0".to_string(),
        },
        QueryValue::Multi(values) => {
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| binder.bind_filter(column, directive.operator, v))
                .collect();
            match directive.operator {
                Operator::Equals => format!("{column} IN ({})", placeholders.join(", ")),
                Operator::NotEquals => format!("{column} NOT IN ({})", placeholders.join(", ")),
                _ => {
                    let any: Vec<String> = placeholders
                        .iter()
                        .map(|p| format!("{column} {op} {p}"))
                        .collect();
                    format!("({})", any.join(" OR "))
                }
            }
        }
    }
}
