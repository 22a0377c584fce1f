//! Relational backend for polystore.
//!
//! Filter, update and pipeline documents (already parsed by `polystore-core`) are
//! compiled into a small SQL AST ([`ast`]) and rendered once per statement for a
//! [`SqlDialect`]. [`SqlStore`] executes the rendered SQL on SQLite; PostgreSQL
//! rendering is available through [`compile_filter`] and the AST.
//!
//! # Modules
//!
//! - [`ast`]: statements, predicates and the renderer
//! - [`dialect`]: the per-engine differences
//! - [`filter`], [`update`], [`pipeline`]: the three compilers
//! - [`shard`]: the `UNION ALL` relation of a date sharded read
//! - [`catalog`]: table and column lookups
//! - [`store`]: [`SqlStore`] and its builder

pub mod ast;
pub mod catalog;
pub mod dialect;
mod exec;
pub mod filter;
pub mod pipeline;
pub mod shard;
pub mod store;
pub mod update;
pub mod value;
mod write;

pub use dialect::SqlDialect;
pub use filter::compile_filter;
pub use store::{SqlStore, SqlStoreBuilder};
