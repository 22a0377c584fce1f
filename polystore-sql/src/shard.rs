//! Date sharded reads: the per-day tables of a range, read as one relation.

use polystore_core::{catalog::Catalog, error::StoreResult, query::Query, shard::ShardRange};

use crate::ast::{Ident, Relation};

/// The relation a sharded read selects from: every existing day table of the filter's
/// range, concatenated under the base name so columns stay unqualified.
///
/// Returns `None` when no table of the range exists.
pub fn shard_relation(
    base: &str,
    field: &str,
    query: &Query,
    catalog: &impl Catalog,
) -> StoreResult<Option<Relation>> {
    let tables = ShardRange::from_filter(field, &query.filter)?
        .resolve(base, catalog)?
        .iter()
        .map(|table| Ident::new(table))
        .collect::<StoreResult<Vec<_>>>()?;

    if tables.is_empty() {
        return Ok(None);
    }

    Ok(Some(Relation::Union { tables, alias: Ident::table(base)? }))
}
