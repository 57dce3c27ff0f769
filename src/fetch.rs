//! Paginated, total-bounded row fetch
//!
//! Reads every row matching a [`RowQuery`] by requesting fixed-size windows
//! until the server-reported total is reached, the server returns an empty
//! page, or (when no total is reported) a short page comes back.

use crate::error::Result;
use crate::models::id_text;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Rows requested per window
pub const PAGE_SIZE: usize = 10_000;

/// A collection inside a schema (`raw_data.setlists`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Range filter on a date-valued column: `start <= column < end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    /// Column expression, e.g. `showdate` or `data->>showdate`
    pub column: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Window covering one calendar year.
    pub fn year(column: impl Into<String>, year: i32) -> Option<Self> {
        Some(Self {
            column: column.into(),
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    }
}

/// What to read: collection, projection and optional filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub table: TableRef,
    /// Comma-separated select list
    pub select: String,
    pub window: Option<DateWindow>,
    pub distinct: bool,
}

impl RowQuery {
    pub fn new(table: TableRef, select: impl Into<String>) -> Self {
        Self {
            table,
            select: select.into(),
            window: None,
            distinct: false,
        }
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

/// Inclusive row window `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub from: usize,
    pub to: usize,
}

impl PageRange {
    pub fn starting_at(from: usize, page_size: usize) -> Self {
        Self {
            from,
            to: from + page_size.max(1) - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.to - self.from + 1
    }
}

/// One page of rows plus the total the server reported, if any.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Value>,
    pub total: Option<usize>,
}

/// Anything that can serve windows of a queryable collection.
pub trait PageSource {
    fn fetch_page(&self, query: &RowQuery, range: PageRange) -> Result<Page>;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn fetch_page(&self, query: &RowQuery, range: PageRange) -> Result<Page> {
        (**self).fetch_page(query, range)
    }
}

/// Parse the total out of a `Content-Range` header.
///
/// Accepts `0-9999/12345`, `items 0-9999/12345` and `*/0`; an unknown
/// total (`0-9/*`) or a malformed header yields `None`.
pub fn parse_content_range_total(header: &str) -> Option<usize> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Fetch every row matching `query` using the default page size.
pub fn fetch_all<S: PageSource>(source: &S, query: &RowQuery) -> Result<Vec<Value>> {
    fetch_all_paged(source, query, PAGE_SIZE)
}

/// Fetch every row matching `query`, `page_size` rows per request.
///
/// All-or-nothing: the first failing page aborts the whole call.
pub fn fetch_all_paged<S: PageSource>(
    source: &S,
    query: &RowQuery,
    page_size: usize,
) -> Result<Vec<Value>> {
    let mut rows = Vec::new();
    let mut from = 0usize;

    loop {
        let range = PageRange::starting_at(from, page_size);
        let page = source.fetch_page(query, range)?;
        let received = page.rows.len();

        debug!(
            "{}: rows {}-{} -> {} (total {:?})",
            query.table, range.from, range.to, received, page.total
        );

        rows.extend(page.rows);

        if received == 0 {
            break;
        }
        match page.total {
            Some(total) if from + received >= total => break,
            None if received < range.len() => break,
            _ => {}
        }
        from += received;
    }

    Ok(rows)
}

/// Fetch the distinct, string-normalized values of `key_field`.
///
/// Rows where the key is null or missing are skipped.
pub fn fetch_distinct_ids<S: PageSource>(
    source: &S,
    query: &RowQuery,
    key_field: &str,
) -> Result<BTreeSet<String>> {
    fetch_distinct_ids_paged(source, query, key_field, PAGE_SIZE)
}

pub fn fetch_distinct_ids_paged<S: PageSource>(
    source: &S,
    query: &RowQuery,
    key_field: &str,
    page_size: usize,
) -> Result<BTreeSet<String>> {
    let rows = fetch_all_paged(source, query, page_size)?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get(key_field).and_then(id_text))
        .collect())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory page source shared by the module tests.

    use super::*;
    use crate::error::SyncError;
    use std::cell::{Cell, RefCell};

    pub struct MemoryPages {
        pub rows: Vec<Value>,
        pub report_total: bool,
        /// Server-side cap on rows per response
        pub max_rows: Option<usize>,
        /// Return this status on the n-th call (0-based)
        pub fail_on_call: Option<(usize, u16)>,
        pub calls: Cell<usize>,
        pub seen: RefCell<Vec<(RowQuery, PageRange)>>,
    }

    impl MemoryPages {
        pub fn new(rows: Vec<Value>) -> Self {
            Self {
                rows,
                report_total: true,
                max_rows: None,
                fail_on_call: None,
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }

        pub fn without_total(mut self) -> Self {
            self.report_total = false;
            self
        }
    }

    impl PageSource for MemoryPages {
        fn fetch_page(&self, query: &RowQuery, range: PageRange) -> Result<Page> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            self.seen.borrow_mut().push((query.clone(), range));

            if let Some((n, status)) = self.fail_on_call {
                if n == call {
                    return Err(SyncError::Fetch {
                        status,
                        body: "boom".into(),
                    });
                }
            }

            let mut end = (range.to + 1).min(self.rows.len());
            if let Some(cap) = self.max_rows {
                end = end.min(range.from + cap);
            }
            let rows = if range.from < end {
                self.rows[range.from..end].to_vec()
            } else {
                Vec::new()
            };

            Ok(Page {
                rows,
                total: self.report_total.then_some(self.rows.len()),
            })
        }
    }
}
