//! Main store interface.
//!
//! # Example
//!
//! ```ignore
//! use polystore::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let users = store.typed_collection::<User>();
//! let items = store.collection("items");
//! ```

use crate::{
    backend::StoreBackend,
    collection::{Collection, TypedCollection},
    error::StoreResult,
    record::Record,
};

/// A store bound to a backend.
///
/// Use `DocumentStore<Box<dyn StoreBackend>>` to pick the backend at runtime.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new store with the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets the collection of record type `R`, named by `R::collection_name()`.
    pub fn typed_collection<'a, R: Record>(&'a self) -> TypedCollection<'a, B, R> {
        TypedCollection::new(&self.backend)
    }

    /// Gets an untyped collection with the given name.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), &self.backend)
    }

    /// Shuts down the backend, consuming the store.
    pub async fn shutdown(self) -> StoreResult<()> {
        self.backend.shutdown().await
    }
}

impl<B: StoreBackend> From<B> for DocumentStore<B> {
    fn from(backend: B) -> Self {
        Self::new(backend)
    }
}
