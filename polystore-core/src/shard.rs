//! Date sharding: one physical table per day of a logical collection.
//!
//! A read against a sharded collection must bound the shard field on both sides. The
//! bounds select one candidate table per day (`<base>_<YYYYMMDD>`); only the candidates
//! the catalog knows are read, so gaps in the partition set are not an error.

use bson::Bson;
use chrono::{DateTime, NaiveDate};

use crate::{
    catalog::Catalog,
    error::{StoreError, StoreResult},
    options::CollectionOptions,
    query::{Expr, FieldOp, Query, ShardingDirective},
};

/// The field a read shards on, if any.
///
/// A `_date_sharding` directive on the call wins over the collection options.
///
/// # Errors
///
/// Returns [`StoreError::Configuration`] when the call asks for the collection's shard
/// field but none is configured.
pub fn sharding_field(query: &Query, options: Option<&CollectionOptions>) -> StoreResult<Option<String>> {
    let configured = options.and_then(|options| options.date_sharding.as_ref());

    match &query.date_sharding {
        Some(ShardingDirective::Disabled) => Ok(None),
        Some(ShardingDirective::Field(field)) => Ok(Some(field.clone())),
        Some(ShardingDirective::CollectionDefault) => match configured {
            Some(sharding) => Ok(Some(sharding.field.clone())),
            None => Err(StoreError::configuration(
                "_date_sharding is true but the collection has no shard field configured",
            )),
        },
        None => Ok(configured
            .filter(|sharding| sharding.enabled)
            .map(|sharding| sharding.field.clone())),
    }
}

/// Inclusive day range of a sharded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ShardRange {
    /// Extracts the range from the top-level conjuncts of `filter`: the lower bound from
    /// `$gte`, the upper bound from `$lte` or `$lt`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if either bound is missing and
    /// [`StoreError::Translation`] if a bound is not a date.
    pub fn from_filter(field: &str, filter: &Expr) -> StoreResult<Self> {
        let mut start = None;
        let mut end = None;

        for conjunct in filter.conjuncts() {
            if let Expr::Field { field: name, op, value } = conjunct {
                if name != field {
                    continue;
                }

                match op {
                    FieldOp::Gte => start = Some(day_of(field, value)?),
                    FieldOp::Lte | FieldOp::Lt => end = Some(day_of(field, value)?),
                    _ => {}
                }
            }
        }

        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(StoreError::configuration(format!(
                "sharded read on {field} needs both a $gte and a $lte/$lt bound"
            ))),
        }
    }

    /// Number of days covered, both ends included. Zero when the range is inverted.
    pub fn days(&self) -> u64 {
        let span = (self.end - self.start).num_days();
        u64::try_from(span + 1).unwrap_or(0)
    }

    /// One candidate table name per day of the range.
    pub fn table_names(&self, base: &str) -> Vec<String> {
        self.start
            .iter_days()
            .take_while(|day| *day <= self.end)
            .map(|day| format!("{base}_{}", day.format("%Y%m%d")))
            .collect()
    }

    /// Candidate tables that exist in `catalog`, in day order.
    pub fn resolve(&self, base: &str, catalog: &impl Catalog) -> StoreResult<Vec<String>> {
        let mut existing = Vec::new();

        for table in self.table_names(base) {
            if catalog.table_exists(&table)? {
                existing.push(table);
            }
        }

        tracing::debug!(
            collection = base,
            days = self.days(),
            shards = existing.len(),
            "resolved date shards"
        );

        Ok(existing)
    }
}

fn day_of(field: &str, value: &Bson) -> StoreResult<NaiveDate> {
    let day = match value {
        Bson::DateTime(at) => DateTime::from_timestamp_millis(at.timestamp_millis()).map(|at| at.date_naive()),
        Bson::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|at| at.date_naive())
            .ok()
            .or_else(|| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()),
        _ => None,
    };

    day.ok_or_else(|| StoreError::translation(format!("shard bound on {field} is not a date: {value}")))
}
