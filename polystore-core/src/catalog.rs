//! Catalog lookups a backend offers to the compilers.

use std::collections::HashSet;

use crate::error::StoreResult;

/// A column of a table as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, when the engine reports one.
    pub data_type: Option<String>,
}

/// Read-only view of the tables (or collections) a backend holds.
pub trait Catalog {
    /// Returns `true` if `table` exists.
    fn table_exists(&self, table: &str) -> StoreResult<bool>;

    /// Columns of `table`, in declaration order. An empty list means the catalog has no
    /// information and callers fall back to untyped columns.
    fn columns(&self, _table: &str) -> StoreResult<Vec<ColumnInfo>> {
        Ok(Vec::new())
    }
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        (**self).table_exists(table)
    }

    fn columns(&self, table: &str) -> StoreResult<Vec<ColumnInfo>> {
        (**self).columns(table)
    }
}

/// A catalog snapshot made of a set of known names.
impl Catalog for HashSet<String> {
    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        Ok(self.contains(table))
    }
}
