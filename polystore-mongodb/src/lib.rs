//! MongoDB backend implementation for polystore.
//!
//! Filters, updates and pipelines are already document-shaped, so this backend mostly
//! passes them through. The translation evens out the places where the relational
//! backend would otherwise return a different shape: grouped rows, `$unset` and
//! case-insensitive matching.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! polystore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Transactions
//!
//! Every write runs inside a session transaction, so the deployment must be a replica
//! set or a sharded cluster. A standalone server rejects the first write.
//!
//! # Example
//!
//! ```ignore
//! use polystore::{backend::StoreBackendBuilder, mongodb::MongoDbStore, options::CollectionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017/?replicaSet=rs0", "my_database")
//!         .collection("events", CollectionOptions::sharded_by("day"))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as polystore_mongodb;

pub mod pipeline;
pub mod query;
pub mod store;
pub mod update;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
