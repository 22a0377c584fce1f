//! SQLite catalog lookups.

use rusqlite::{Connection, OptionalExtension};

use polystore_core::{
    catalog::{Catalog, ColumnInfo},
    error::{StoreError, StoreResult},
};

/// Reads table and column metadata through one connection.
#[derive(Debug, Clone, Copy)]
pub struct SqliteCatalog<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteCatalog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl Catalog for SqliteCatalog<'_> {
    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 \
                 UNION ALL \
                 SELECT 1 FROM sqlite_temp_master WHERE type IN ('table', 'view') AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| StoreError::backend("catalog lookup", e))
    }

    fn columns(&self, table: &str) -> StoreResult<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1)")
            .map_err(|e| StoreError::backend("catalog lookup", e))?;

        let rows = stmt
            .query_map([table], |row| {
                let data_type: Option<String> = row.get(1)?;
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: data_type.filter(|declared| !declared.is_empty()),
                })
            })
            .map_err(|e| StoreError::backend("catalog lookup", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend("catalog lookup", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_tables_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (_id TEXT PRIMARY KEY, value INTEGER, note);
             CREATE TEMP TABLE scratch (_id TEXT);",
        )
        .unwrap();
        let catalog = SqliteCatalog::new(&conn);

        assert!(catalog.table_exists("items").unwrap());
        assert!(catalog.table_exists("scratch").unwrap());
        assert!(!catalog.table_exists("missing").unwrap());

        assert_eq!(
            catalog.columns("items").unwrap(),
            vec![
                ColumnInfo { name: "_id".into(), data_type: Some("TEXT".into()) },
                ColumnInfo { name: "value".into(), data_type: Some("INTEGER".into()) },
                ColumnInfo { name: "note".into(), data_type: None },
            ]
        );
        assert!(catalog.columns("missing").unwrap().is_empty());
    }
}
