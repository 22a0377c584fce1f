//! Storage backend abstraction.
//!
//! This module defines the traits that abstract over the storage engines a
//! [`DocumentStore`](crate::store::DocumentStore) can sit on. Every backend receives
//! filter, update and pipeline documents already parsed into [`Query`], [`UpdateSpec`]
//! and [`Pipeline`], so a malformed document never reaches a backend.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use polystore::{backend::StoreBackend, context::CallContext, query::Query};
//! use bson::doc;
//!
//! let query = Query::parse(&doc! { "category": "A" })?;
//! let rows = backend.find_documents(&CallContext::background(), "items", query).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use std::fmt::Debug;

use crate::{
    context::CallContext,
    error::StoreResult,
    index::IndexSpec,
    pipeline::Pipeline,
    query::Query,
    update::UpdateSpec,
};

/// Abstract interface for storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Each write operation owns one backend transaction for its whole duration
/// and never shares it with a concurrent call.
///
/// # Cancellation
///
/// Every method checks the [`CallContext`] on entry and before each statement it issues.
/// A canceled or expired context fails the call with
/// [`StoreError::Canceled`](crate::error::StoreError::Canceled) and rolls back any open
/// transaction.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts documents into a collection.
    ///
    /// Documents without an `_id` get a fresh one.
    ///
    /// # Returns
    ///
    /// The ids of the inserted documents, in input order.
    async fn insert_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<ObjectId>>;

    /// Queries documents with a parsed filter, applying sort, offset and limit.
    ///
    /// Honors `_collection` and date sharding.
    async fn find_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
        query: Query,
    ) -> StoreResult<Vec<Document>>;

    /// Counts the documents matching a filter, ignoring sort, offset and limit.
    async fn count_documents(&self, ctx: &CallContext, collection: &str, query: Query) -> StoreResult<u64>;

    /// Runs an aggregation pipeline and returns its result rows.
    async fn aggregate(
        &self,
        ctx: &CallContext,
        collection: &str,
        pipeline: Pipeline,
    ) -> StoreResult<Vec<Document>>;

    /// Writes the fields of each object onto the stored row with the same `_id`.
    ///
    /// Without a filter every object is applied on its own id and an id that matches
    /// nothing aborts the whole call with
    /// [`StoreError::NotFound`](crate::error::StoreError::NotFound). With a filter the
    /// rows must additionally match it. Objects without an `_id` are skipped.
    ///
    /// # Returns
    ///
    /// The number of rows modified.
    async fn bulk_update(
        &self,
        ctx: &CallContext,
        collection: &str,
        objects: Vec<Document>,
        filter: Option<Query>,
    ) -> StoreResult<u64>;

    /// Applies an update to every row matching the filter.
    ///
    /// An empty update is a no-op success. A filter without predicates updates every
    /// row. Zero matched rows is
    /// [`StoreError::NotFound`](crate::error::StoreError::NotFound).
    async fn update_all(
        &self,
        ctx: &CallContext,
        collection: &str,
        query: Query,
        update: UpdateSpec,
    ) -> StoreResult<u64>;

    /// Updates the rows matching the filter, or inserts a new row when none match.
    ///
    /// # Arguments
    ///
    /// * `preset` - The id the caller's row already carries. It wins over a filter `_id`
    ///   for a new row and is re-asserted on the returned row either way.
    ///
    /// # Returns
    ///
    /// The stored row after the write.
    async fn upsert(
        &self,
        ctx: &CallContext,
        collection: &str,
        query: Query,
        update: UpdateSpec,
        preset: Option<ObjectId>,
    ) -> StoreResult<Document>;

    /// Creates an index. Creating an index that already exists is not an error.
    async fn create_index(&self, ctx: &CallContext, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    /// Drops an index by name.
    async fn drop_index(&self, ctx: &CallContext, collection: &str, name: &str) -> StoreResult<()>;

    /// Releases the backend's resources.
    async fn shutdown(self) -> StoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

macro_rules! forward_store_backend {
    ($($ty:ty),*) => {$(
        #[async_trait]
        impl<B> StoreBackend for $ty
        where
            B: StoreBackend + ?Sized,
        {
            async fn insert_documents(
                &self,
                ctx: &CallContext,
                collection: &str,
                documents: Vec<Document>,
            ) -> StoreResult<Vec<ObjectId>> {
                (**self)
                    .insert_documents(ctx, collection, documents)
                    .await
            }

            async fn find_documents(
                &self,
                ctx: &CallContext,
                collection: &str,
                query: Query,
            ) -> StoreResult<Vec<Document>> {
                (**self)
                    .find_documents(ctx, collection, query)
                    .await
            }

            async fn count_documents(
                &self,
                ctx: &CallContext,
                collection: &str,
                query: Query,
            ) -> StoreResult<u64> {
                (**self)
                    .count_documents(ctx, collection, query)
                    .await
            }

            async fn aggregate(
                &self,
                ctx: &CallContext,
                collection: &str,
                pipeline: Pipeline,
            ) -> StoreResult<Vec<Document>> {
                (**self)
                    .aggregate(ctx, collection, pipeline)
                    .await
            }

            async fn bulk_update(
                &self,
                ctx: &CallContext,
                collection: &str,
                objects: Vec<Document>,
                filter: Option<Query>,
            ) -> StoreResult<u64> {
                (**self)
                    .bulk_update(ctx, collection, objects, filter)
                    .await
            }

            async fn update_all(
                &self,
                ctx: &CallContext,
                collection: &str,
                query: Query,
                update: UpdateSpec,
            ) -> StoreResult<u64> {
                (**self)
                    .update_all(ctx, collection, query, update)
                    .await
            }

            async fn upsert(
                &self,
                ctx: &CallContext,
                collection: &str,
                query: Query,
                update: UpdateSpec,
                preset: Option<ObjectId>,
            ) -> StoreResult<Document> {
                (**self)
                    .upsert(ctx, collection, query, update, preset)
                    .await
            }

            async fn create_index(
                &self,
                ctx: &CallContext,
                collection: &str,
                index: &IndexSpec,
            ) -> StoreResult<()> {
                (**self)
                    .create_index(ctx, collection, index)
                    .await
            }

            async fn drop_index(&self, ctx: &CallContext, collection: &str, name: &str) -> StoreResult<()> {
                (**self)
                    .drop_index(ctx, collection, name)
                    .await
            }
        }
    )*};
}

forward_store_backend!(&B, Box<B>, std::sync::Arc<B>);

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}
