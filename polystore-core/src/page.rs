//! Pagination of query results.

use serde::{Deserialize, Serialize};

use crate::{error::StoreResult, query::Query};

/// One page of a `find_page` call.
///
/// `total` is only filled in when the filter carried `_count: true`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total number of matches across all pages.
    pub total: Option<u64>,
    /// Offset of the first item of this page.
    pub offset: u64,
    /// Requested page size.
    pub limit: Option<u64>,
}

impl<T> Page<T> {
    pub(crate) fn new(items: Vec<T>, query: &Query, total: Option<u64>) -> Self {
        Self { items, total, offset: query.offset.unwrap_or(0), limit: query.limit }
    }

    /// Offset of the next page, if the total is known and more items remain.
    pub fn next_offset(&self) -> Option<u64> {
        let next = self.offset + self.items.len() as u64;

        match self.total {
            Some(total) if next < total && !self.items.is_empty() => Some(next),
            _ => None,
        }
    }

    /// Offset of the previous page, if this is not the first one.
    pub fn previous_offset(&self) -> Option<u64> {
        match (self.offset, self.limit) {
            (0, _) => None,
            (offset, Some(limit)) => Some(offset.saturating_sub(limit)),
            (_, None) => Some(0),
        }
    }

    /// Converts every item, keeping the paging metadata.
    pub fn try_map<U>(self, f: impl FnMut(T) -> StoreResult<U>) -> StoreResult<Page<U>> {
        Ok(Page {
            items: self
                .items
                .into_iter()
                .map(f)
                .collect::<StoreResult<Vec<_>>>()?,
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        })
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self { items: Vec::new(), total: None, offset: 0, limit: None }
    }
}
