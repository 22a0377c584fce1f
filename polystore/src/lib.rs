//! Main polystore crate providing one document-style vocabulary over several stores.
//!
//! Callers speak MongoDB-style filter, update and aggregation documents. The same
//! documents run against a relational database (compiled to SQL) or a document
//! database (translated to native commands), and both return the same rows.
//!
//! # Features
//!
//! - `sql` (default) - The SQLite backend in [`sql`]
//! - `mongodb` - The MongoDB backend in [`mongodb`]
//!
//! # Quick Start
//!
//! ```ignore
//! use polystore::{prelude::*, bson::{doc, oid::ObjectId}, sql::SqlStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Record)]
//! #[record(collection = "items")]
//! pub struct Item {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub category: String,
//!     pub value: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> StoreResult<()> {
//!     let store = DocumentStore::new(SqlStore::builder().build().await?);
//!     store.backend().execute_batch("CREATE TABLE items (_id TEXT PRIMARY KEY, category TEXT, value INTEGER)").await?;
//!
//!     let items = store.typed_collection::<Item>();
//!     items.update_all(&doc! { "category": "A" }, &doc! { "$inc": { "value": 5 } }).await?;
//!
//!     let totals = store
//!         .collection("items")
//!         .aggregate(&[doc! { "$group": { "_id": "$category", "total": { "$sum": "$value" } } }])
//!         .await?;
//!     println!("{totals:?}");
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Runtime backend selection
//!
//! [`config::StoreConfig`] describes a backend and its collections in JSON, and
//! [`config::connect`] opens it behind `Box<dyn StoreBackend>`.
//!
//! ```ignore
//! let config = StoreConfig::from_json(r#"{
//!     "backend": { "kind": "sqlite", "path": "data.db" },
//!     "collections": { "events": { "date_sharding": { "field": "day" } } }
//! }"#)?;
//! let store = polystore::config::connect(config).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as polystore;

pub mod config;
pub mod prelude;

pub use polystore_core::{
    backend,
    catalog,
    collection,
    context,
    error,
    index,
    options,
    page,
    pipeline,
    query,
    record,
    shard,
    store,
    update,
    write,
};
pub use polystore_macros::Record;

// Re-export BSON types for convenience
pub use bson;

/// SQLite storage backend.
///
/// This module is only available when the `sql` feature is enabled.
#[cfg(feature = "sql")]
pub mod sql {
    pub use polystore_sql::{SqlDialect, SqlStore, SqlStoreBuilder, compile_filter};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use polystore_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
