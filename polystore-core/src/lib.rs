//! One document-style query, update and aggregation vocabulary over heterogeneous stores.
//!
//! This crate is the backend-independent core of polystore and provides:
//!
//! - **Filter documents** ([`query`]) - Parsing into a typed expression tree plus meta keys
//! - **Update documents** ([`update`]) - Parsing into column instructions
//! - **Aggregation pipelines** ([`pipeline`]) - Parsing into typed stages
//! - **Date sharding** ([`shard`]) - Day-range resolution of partitioned collections
//! - **Write rules** ([`write`]) - Bulk update checks and upsert row construction
//! - **Store backend abstraction** ([`backend`]) - The trait every storage engine implements
//! - **Collections and stores** ([`collection`], [`store`]) - The caller-facing API
//! - **Records** ([`record`]) - The row contract of typed collections
//! - **Error handling** ([`error`]) - Error taxonomy and result type
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use polystore::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let items = store.collection("items");
//!
//! items.update_all(&doc! { "category": "A" }, &doc! { "$inc": { "value": 5 } }).await?;
//! let rows = items
//!     .aggregate(&[doc! { "$match": { "value": { "$gt": 50 } } }])
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as polystore_core;

pub mod backend;
pub mod catalog;
pub mod collection;
pub mod context;
pub mod error;
pub mod index;
pub mod options;
pub mod page;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod shard;
pub mod store;
pub mod update;
pub mod write;
