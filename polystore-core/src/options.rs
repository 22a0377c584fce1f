//! Per-collection configuration.

use serde::{Deserialize, Serialize};

/// Options a store applies to one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Time partitioning of the collection into one table per day.
    #[serde(default)]
    pub date_sharding: Option<DateSharding>,
}

impl CollectionOptions {
    /// Options for a collection sharded by day on `field`.
    pub fn sharded_by(field: impl Into<String>) -> Self {
        Self { date_sharding: Some(DateSharding { field: field.into(), enabled: true }) }
    }
}

/// Day partitioning: rows of collection `c` for day `D` live in `c_YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSharding {
    /// The date field whose range selects the partitions.
    pub field: String,
    /// Whether reads shard by default. Calls can still opt in or out with `_date_sharding`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
