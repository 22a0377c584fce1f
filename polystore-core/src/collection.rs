//! Collection types for store operations.
//!
//! A collection parses filter, update and pipeline documents before it calls the
//! backend, so a document that fails to compile never issues a statement.
//!
//! # Collection Types
//!
//! - [`Collection`] - Untyped collection working on BSON documents
//! - [`TypedCollection`] - Collection of a [`Record`] type
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//!
//! let items = store.collection("items");
//! items.update_all(&doc! { "category": "A" }, &doc! { "$inc": { "value": 5 } }).await?;
//!
//! let adults = store
//!     .typed_collection::<User>()
//!     .find(&doc! { "age": { "$gte": 18 }, "_sort": "-age" })
//!     .await?;
//! ```

use bson::{Document, oid::ObjectId};
use std::marker::PhantomData;

use crate::{
    backend::StoreBackend,
    context::CallContext,
    error::{StoreError, StoreResult},
    index::IndexSpec,
    page::Page,
    pipeline::Pipeline,
    query::Query,
    record::{Record, RecordExt},
    update::UpdateSpec,
    write::bulk_update_filter,
};

/// An untyped collection with a reference to a storage backend.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    ctx: CallContext,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend, ctx: CallContext::background() }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of this collection whose calls run under `ctx`.
    pub fn with_context(&self, ctx: CallContext) -> Self {
        Self { name: self.name.clone(), backend: self.backend, ctx }
    }

    fn table(&self) -> StoreResult<&str> {
        if self.name.is_empty() {
            return Err(StoreError::configuration("collection name must not be empty"));
        }

        Ok(&self.name)
    }

    /// Inserts documents, assigning an `_id` to those without one.
    ///
    /// # Returns
    ///
    /// The ids of the inserted documents, in input order.
    pub async fn insert(&self, documents: Vec<Document>) -> StoreResult<Vec<ObjectId>> {
        self.backend
            .insert_documents(&self.ctx, self.table()?, documents)
            .await
    }

    /// Finds the documents matching a filter document.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Translation`] if the filter does not parse.
    pub async fn find(&self, filter: &Document) -> StoreResult<Vec<Document>> {
        let query = Query::parse(filter)?;

        self.backend
            .find_documents(&self.ctx, self.table()?, query)
            .await
    }

    /// Like [`find`](Self::find), also reporting the total match count when the filter
    /// carries `_count: true`.
    pub async fn find_page(&self, filter: &Document) -> StoreResult<Page<Document>> {
        let query = Query::parse(filter)?;
        let table = self.table()?;

        let total = match query.count {
            true => Some(
                self.backend
                    .count_documents(&self.ctx, table, query.clone())
                    .await?,
            ),
            false => None,
        };
        let items = self
            .backend
            .find_documents(&self.ctx, table, query.clone())
            .await?;

        Ok(Page::new(items, &query, total))
    }

    /// Counts the documents matching a filter document.
    pub async fn count(&self, filter: &Document) -> StoreResult<u64> {
        let query = Query::parse(filter)?;

        self.backend
            .count_documents(&self.ctx, self.table()?, query)
            .await
    }

    /// Runs an aggregation pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Translation`] for the first unsupported or malformed stage.
    pub async fn aggregate(&self, stages: &[Document]) -> StoreResult<Vec<Document>> {
        let pipeline = Pipeline::parse(stages)?;

        self.backend
            .aggregate(&self.ctx, self.table()?, pipeline)
            .await
    }

    /// Writes each object's fields onto the row with the same `_id`.
    ///
    /// # Arguments
    ///
    /// * `objects` - Field sets keyed by `_id`
    /// * `filters` - At most one filter document the updated rows must also match
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Validation`] for an empty object list, a repeated `_id` or
    /// more than one filter, and [`StoreError::NotFound`] when an object matches nothing.
    pub async fn bulk_update(&self, objects: Vec<Document>, filters: &[Document]) -> StoreResult<u64> {
        let filter = bulk_update_filter(&objects, filters)?;

        self.backend
            .bulk_update(&self.ctx, self.table()?, objects, filter)
            .await
    }

    /// Applies an update document to every row matching a filter document.
    pub async fn update_all(&self, filter: &Document, update: &Document) -> StoreResult<u64> {
        let query = Query::parse(filter)?;
        let update = UpdateSpec::parse(update)?;
        query.ensure_unsharded()?;

        self.backend
            .update_all(&self.ctx, self.table()?, query, update)
            .await
    }

    /// Updates the rows matching a filter document, inserting a new row when none match.
    ///
    /// # Arguments
    ///
    /// * `preset` - An id the caller already assigned; it wins over a filter `_id`
    pub async fn upsert(
        &self,
        filter: &Document,
        update: &Document,
        preset: Option<ObjectId>,
    ) -> StoreResult<Document> {
        let query = Query::parse(filter)?;
        let update = UpdateSpec::parse(update)?;
        query.ensure_unsharded()?;

        self.backend
            .upsert(&self.ctx, self.table()?, query, update, preset)
            .await
    }

    /// Creates an index on this collection.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Validation`] for an invalid spec.
    pub async fn create_index(&self, index: &IndexSpec) -> StoreResult<()> {
        index.validate()?;

        self.backend
            .create_index(&self.ctx, self.table()?, index)
            .await
    }

    /// Drops an index of this collection by name.
    pub async fn drop_index(&self, name: &str) -> StoreResult<()> {
        self.backend
            .drop_index(&self.ctx, self.table()?, name)
            .await
    }
}

/// A collection of records of type `R`.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
/// * `R` - The record type stored in this collection
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, R: Record> {
    inner: Collection<'a, B>,
    _marker: PhantomData<R>,
}

impl<'a, B: StoreBackend, R: Record> TypedCollection<'a, B, R> {
    pub(crate) fn new(backend: &'a B) -> Self {
        Self { inner: Collection::new(R::collection_name().to_string(), backend), _marker: PhantomData }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns a copy of this collection whose calls run under `ctx`.
    pub fn with_context(&self, ctx: CallContext) -> Self {
        Self { inner: self.inner.with_context(ctx), _marker: PhantomData }
    }

    /// The untyped view of this collection.
    pub fn untyped(&self) -> &Collection<'a, B> {
        &self.inner
    }

    /// Inserts records, assigning ids to those without one.
    pub async fn insert(&self, records: &mut [R]) -> StoreResult<()> {
        let documents = records
            .iter()
            .map(RecordExt::to_fields)
            .collect::<StoreResult<Vec<_>>>()?;
        let ids = self.inner.insert(documents).await?;

        for (record, id) in records.iter_mut().zip(ids) {
            record.set_id(id);
        }

        Ok(())
    }

    pub async fn find(&self, filter: &Document) -> StoreResult<Vec<R>> {
        self.inner
            .find(filter)
            .await?
            .into_iter()
            .map(R::from_fields)
            .collect()
    }

    pub async fn find_page(&self, filter: &Document) -> StoreResult<Page<R>> {
        self.inner
            .find_page(filter)
            .await?
            .try_map(R::from_fields)
    }

    pub async fn count(&self, filter: &Document) -> StoreResult<u64> {
        self.inner.count(filter).await
    }

    /// Writes each record onto the stored row with the same id.
    pub async fn bulk_update(&self, records: &[R], filters: &[Document]) -> StoreResult<u64> {
        let objects = records
            .iter()
            .map(RecordExt::to_fields)
            .collect::<StoreResult<Vec<_>>>()?;

        self.inner
            .bulk_update(objects, filters)
            .await
    }

    pub async fn update_all(&self, filter: &Document, update: &Document) -> StoreResult<u64> {
        self.inner
            .update_all(filter, update)
            .await
    }

    /// Upserts and populates `record` with the stored row.
    ///
    /// An id already set on `record` is kept.
    pub async fn upsert(&self, filter: &Document, update: &Document, record: &mut R) -> StoreResult<()> {
        let preset = record.id().copied();
        let stored = self
            .inner
            .upsert(filter, update, preset)
            .await?;

        *record = R::from_fields(stored)?;
        if let Some(id) = preset {
            record.set_id(id);
        }

        Ok(())
    }
}
