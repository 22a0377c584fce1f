//! Statement execution and transactions.

use bson::{Bson, Document};
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, error, warn};

use polystore_core::{
    context::CallContext,
    error::{StoreError, StoreResult},
};

use crate::{
    ast::{Render, Select},
    dialect::{ColumnType, SqlDialect},
    value::{ScanColumn, scan_row},
};

/// Runs rendered statements on one connection under one call context.
///
/// The context is checked before every statement.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Executor<'c> {
    conn: &'c Connection,
    ctx: &'c CallContext,
    dialect: SqlDialect,
}

impl<'c> Executor<'c> {
    pub fn new(conn: &'c Connection, ctx: &'c CallContext) -> Self {
        Self { conn, ctx, dialect: SqlDialect::Sqlite }
    }

    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Executes a statement and returns the number of rows it changed.
    pub fn execute(&self, operation: &str, statement: &impl Render) -> StoreResult<usize> {
        self.ctx.check()?;

        let fragment = statement.to_sql(self.dialect);
        debug!(operation, sql = %fragment.sql, params = fragment.params.len(), "executing statement");

        self.conn
            .execute(&fragment.sql, params_from_iter(fragment.params.iter()))
            .map_err(|e| StoreError::backend(operation, e))
    }

    /// Runs a query and scans every row into a document.
    pub fn query(&self, operation: &str, select: &Select) -> StoreResult<Vec<Document>> {
        self.ctx.check()?;

        let fragment = select.to_sql(self.dialect);
        debug!(operation, sql = %fragment.sql, params = fragment.params.len(), "running query");

        let mut stmt = self
            .conn
            .prepare(&fragment.sql)
            .map_err(|e| StoreError::backend(operation, e))?;
        let columns = stmt
            .columns()
            .iter()
            .map(|column| ScanColumn {
                name: column.name().to_string(),
                column_type: column.decl_type().map(|declared| ColumnType::from_declared(Some(declared))),
            })
            .collect::<Vec<_>>();

        let rows = stmt
            .query_map(params_from_iter(fragment.params.iter()), |row| scan_row(row, &columns))
            .map_err(|e| StoreError::backend(operation, e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend(operation, e))
    }

    /// Runs a single-row `COUNT` query and reads its only column.
    pub fn count(&self, operation: &str, select: &Select) -> StoreResult<u64> {
        let rows = self.query(operation, select)?;

        let count = rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(|value| match value {
                Bson::Int64(count) => u64::try_from(*count).ok(),
                Bson::Int32(count) => u64::try_from(*count).ok(),
                _ => None,
            });

        count.ok_or_else(|| StoreError::backend(operation, "count query returned no number"))
    }
}

/// Runs `body` inside one transaction on `conn`.
///
/// The transaction commits when `body` succeeds and is rolled back when it fails; the
/// error of `body` is returned either way. Failing to begin or commit is a
/// [`StoreError::Transaction`].
pub(crate) fn in_transaction<T>(
    conn: &mut Connection,
    ctx: &CallContext,
    operation: &str,
    collection: &str,
    body: impl FnOnce(&Executor<'_>) -> StoreResult<T>,
) -> StoreResult<T> {
    ctx.check()?;

    let tx = conn
        .transaction()
        .map_err(|e| StoreError::Transaction(format!("begin {operation}: {e}")))?;

    match body(&Executor::new(&tx, ctx)) {
        Ok(value) => {
            tx.commit()
                .map_err(|e| StoreError::Transaction(format!("commit {operation}: {e}")))?;
            Ok(value)
        }
        Err(err) => {
            if err.is_not_found() {
                debug!(operation, collection, error = %err, "rolling back");
            } else {
                warn!(operation, collection, error = %err, "rolling back");
            }

            if let Err(rollback) = tx.rollback() {
                error!(operation, collection, error = %rollback, "rollback failed");
            }

            Err(err)
        }
    }
}
