//! Convenient re-exports of commonly used types from polystore.
//!
//! ```ignore
//! use polystore::prelude::*;
//! ```

pub use polystore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::{Collection, TypedCollection},
    context::{CallContext, CancelHandle},
    error::{StoreError, StoreResult},
    index::IndexSpec,
    options::{CollectionOptions, DateSharding},
    page::Page,
    query::{Query, Sort, SortDirection},
    record::{Record, RecordExt},
    store::DocumentStore,
};
pub use polystore_macros::Record;

pub use crate::config::{BackendConfig, StoreConfig, connect};
