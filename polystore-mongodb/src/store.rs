use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, IndexModel,
    options::{ClientOptions, IndexOptions},
};
use tracing::{debug, info, warn};

use polystore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    context::CallContext,
    error::{StoreError, StoreResult},
    index::IndexSpec,
    options::CollectionOptions,
    pipeline::Pipeline,
    query::{ID_FIELD, Query},
    record::document_id,
    shard::{ShardRange, sharding_field},
    update::UpdateSpec,
    write::{assert_id, assign_ids, upsert_document, upsert_id},
};

use crate::{
    pipeline::translate_pipeline,
    query::{sort_document, translate_filter},
    update::translate_update,
};

/// A document store over one MongoDB database.
///
/// Every write runs in a session transaction, so the server must be a replica set or a
/// sharded cluster.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    collections: HashMap<String, CollectionOptions>,
}

/// Where a read gets its documents from.
enum Source {
    Collection(String),
    /// The first existing day collection plus `$unionWith` stages for the others.
    Shards(String, Vec<Document>),
    Empty,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String, collections: HashMap<String, CollectionOptions>) -> Self {
        Self { client, database, collections }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn source(&self, collection: &str, query: &Query) -> StoreResult<Source> {
        let name = query.target(collection);
        if name.is_empty() {
            return Err(StoreError::configuration("collection name must not be empty"));
        }

        let Some(field) = sharding_field(query, self.collections.get(name))? else {
            return Ok(Source::Collection(name.to_string()));
        };

        let range = ShardRange::from_filter(&field, &query.filter)?;
        let known = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| StoreError::backend("list collections", e))?
            .into_iter()
            .collect::<HashSet<_>>();

        let mut shards = range.resolve(name, &known)?.into_iter();
        let Some(first) = shards.next() else {
            return Ok(Source::Empty);
        };

        Ok(Source::Shards(first, shards.map(|shard| doc! { "$unionWith": shard }).collect()))
    }

    async fn begin(&self, ctx: &CallContext) -> StoreResult<ClientSession> {
        ctx.check()?;

        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| StoreError::Transaction(format!("start session: {e}")))?;
        session
            .start_transaction()
            .await
            .map_err(|e| StoreError::Transaction(format!("begin: {e}")))?;

        Ok(session)
    }

    /// Commits when `result` is a success and aborts otherwise, returning `result`.
    async fn finish<T>(
        &self,
        mut session: ClientSession,
        operation: &str,
        collection: &str,
        result: StoreResult<T>,
    ) -> StoreResult<T> {
        match result {
            Ok(value) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| StoreError::Transaction(format!("commit {operation}: {e}")))?;
                Ok(value)
            }
            Err(err) => {
                if err.is_not_found() {
                    debug!(operation, collection, error = %err, "aborting transaction");
                } else {
                    warn!(operation, collection, error = %err, "aborting transaction");
                }

                if let Err(abort) = session.abort_transaction().await {
                    warn!(operation, collection, error = %abort, "abort failed");
                }

                Err(err)
            }
        }
    }

    async fn read_by_id(
        &self,
        session: &mut ClientSession,
        collection: &str,
        id: ObjectId,
    ) -> StoreResult<Document> {
        self.get_collection(collection)
            .find_one(doc! { ID_FIELD: id })
            .session(session)
            .await
            .map_err(|e| StoreError::backend("upsert", e))?
            .ok_or_else(|| StoreError::NotFound(format!("_id {id}"), collection.to_string()))
    }

    pub async fn shutdown(self) -> StoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
        mut documents: Vec<Document>,
    ) -> StoreResult<Vec<ObjectId>> {
        let ids = assign_ids(&mut documents)?;
        if documents.is_empty() {
            return Ok(ids);
        }

        let mut session = self.begin(ctx).await?;

        let result: StoreResult<_> = async {
            ctx.check()?;
            self.get_collection(collection)
                .insert_many(documents)
                .session(&mut session)
                .await
                .map_err(|e| StoreError::backend("insert", e))?;

            Ok(ids)
        }
        .await;

        self.finish(session, "insert", collection, result).await
    }

    async fn find_documents(&self, ctx: &CallContext, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        let filter = translate_filter(&query)?;
        ctx.check()?;

        let (name, union) = match self.source(collection, &query).await? {
            Source::Empty => return Ok(Vec::new()),
            Source::Collection(name) => (name, None),
            Source::Shards(first, union) => (first, Some(union)),
        };
        ctx.check()?;

        match union {
            None => {
                let coll = self.get_collection(&name);
                let mut find = coll.find(filter);
                if let Some(sort) = sort_document(&query.sort) {
                    find = find.sort(sort);
                }
                if let Some(skip) = query.offset {
                    find = find.skip(skip);
                }
                if let Some(limit) = query.limit {
                    find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
                }

                find.await
                    .map_err(|e| StoreError::backend("find", e))?
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| StoreError::backend("find", e))
            }
            Some(mut stages) => {
                stages.push(doc! { "$match": filter });
                if let Some(sort) = sort_document(&query.sort) {
                    stages.push(doc! { "$sort": sort });
                }
                if let Some(skip) = query.offset {
                    stages.push(doc! { "$skip": i64::try_from(skip).unwrap_or(i64::MAX) });
                }
                if let Some(limit) = query.limit {
                    stages.push(doc! { "$limit": i64::try_from(limit).unwrap_or(i64::MAX) });
                }

                self.get_collection(&name)
                    .aggregate(stages)
                    .await
                    .map_err(|e| StoreError::backend("find", e))?
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(|e| StoreError::backend("find", e))
            }
        }
    }

    async fn count_documents(&self, ctx: &CallContext, collection: &str, query: Query) -> StoreResult<u64> {
        let filter = translate_filter(&query)?;
        ctx.check()?;

        match self.source(collection, &query).await? {
            Source::Empty => Ok(0),
            Source::Collection(name) => {
                ctx.check()?;
                self.get_collection(&name)
                    .count_documents(filter)
                    .await
                    .map_err(|e| StoreError::backend("count", e))
            }
            Source::Shards(first, mut stages) => {
                ctx.check()?;
                stages.push(doc! { "$match": filter });
                stages.push(doc! { "$count": "count" });

                let rows: Vec<Document> = self
                    .get_collection(&first)
                    .aggregate(stages)
                    .await
                    .map_err(|e| StoreError::backend("count", e))?
                    .try_collect()
                    .await
                    .map_err(|e| StoreError::backend("count", e))?;

                let count = match rows.first().and_then(|row| row.get("count")) {
                    Some(Bson::Int32(count)) => i64::from(*count),
                    Some(Bson::Int64(count)) => *count,
                    _ => 0,
                };

                Ok(u64::try_from(count).unwrap_or(0))
            }
        }
    }

    async fn aggregate(&self, ctx: &CallContext, collection: &str, pipeline: Pipeline) -> StoreResult<Vec<Document>> {
        let stages = translate_pipeline(&pipeline)?;
        ctx.check()?;

        self.get_collection(collection)
            .aggregate(stages)
            .await
            .map_err(|e| StoreError::backend("aggregate", e))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| StoreError::backend("aggregate", e))
    }

    async fn bulk_update(
        &self,
        ctx: &CallContext,
        collection: &str,
        objects: Vec<Document>,
        filter: Option<Query>,
    ) -> StoreResult<u64> {
        let collection = filter.as_ref().map_or(collection, |query| query.target(collection));
        let filter = filter.as_ref().map(translate_filter).transpose()?;
        let groups = group_updates(collection, objects)?;

        if groups.is_empty() {
            return Ok(0);
        }

        let mut session = self.begin(ctx).await?;
        let result: StoreResult<_> = async {
            let mut matched = 0;

            for (fields, ids) in groups {
                ctx.check()?;

                let outcome = self
                    .get_collection(collection)
                    .update_many(bulk_selector(&ids, filter.as_ref()), doc! { "$set": fields })
                    .session(&mut session)
                    .await
                    .map_err(|e| StoreError::backend("bulk update", e))?;

                if filter.is_none() && outcome.matched_count < ids.len() as u64 {
                    let missing = match ids.as_slice() {
                        [id] => format!("_id {id}"),
                        _ => format!("{} of _ids {ids:?}", ids.len() as u64 - outcome.matched_count),
                    };
                    return Err(StoreError::NotFound(missing, collection.to_string()));
                }
                matched += outcome.matched_count;
            }

            match matched {
                0 => Err(StoreError::NotFound("bulk update filter".into(), collection.to_string())),
                matched => Ok(matched),
            }
        }
        .await;

        self.finish(session, "bulk update", collection, result).await
    }

    async fn update_all(&self, ctx: &CallContext, collection: &str, query: Query, update: UpdateSpec) -> StoreResult<u64> {
        let collection = query.target(collection);
        let filter = translate_filter(&query)?;
        let Some(update) = translate_update(&update) else {
            debug!(collection, "update has no instructions");
            return Ok(0);
        };

        let mut session = self.begin(ctx).await?;
        let result: StoreResult<_> = async {
            ctx.check()?;
            let outcome = self
                .get_collection(collection)
                .update_many(filter, update)
                .session(&mut session)
                .await
                .map_err(|e| StoreError::backend("update all", e))?;

            match outcome.matched_count {
                0 => Err(StoreError::NotFound("update filter".into(), collection.to_string())),
                matched => Ok(matched),
            }
        }
        .await;

        self.finish(session, "update all", collection, result).await
    }

    async fn upsert(
        &self,
        ctx: &CallContext,
        collection: &str,
        query: Query,
        update: UpdateSpec,
        preset: Option<ObjectId>,
    ) -> StoreResult<Document> {
        let collection = query.target(collection);
        let filter = translate_filter(&query)?;
        let translated = translate_update(&update);
        let new_id = upsert_id(preset, &query)?;
        let new_row = upsert_document(new_id, &query, &update);

        let mut session = self.begin(ctx).await?;
        let result: StoreResult<_> = async {
            ctx.check()?;
            let existing = self
                .get_collection(collection)
                .find_one(filter.clone())
                .projection(doc! { ID_FIELD: 1 })
                .session(&mut session)
                .await
                .map_err(|e| StoreError::backend("upsert", e))?;

            if let Some(existing) = existing {
                let id = existing
                    .get_object_id(ID_FIELD)
                    .map_err(|e| StoreError::backend("upsert", e))?;

                if let Some(update) = &translated {
                    ctx.check()?;
                    self.get_collection(collection)
                        .update_many(filter.clone(), update.clone())
                        .session(&mut session)
                        .await
                        .map_err(|e| StoreError::backend("upsert", e))?;
                }

                debug!(collection, id = %id, "upsert updated existing documents");
                return Ok(assert_id(self.read_by_id(&mut session, collection, id).await?, preset));
            }

            ctx.check()?;
            self.get_collection(collection)
                .insert_one(new_row.clone())
                .session(&mut session)
                .await
                .map_err(|e| StoreError::backend("upsert", e))?;

            if let Some(update) = &translated {
                ctx.check()?;
                self.get_collection(collection)
                    .update_one(doc! { ID_FIELD: new_id }, update.clone())
                    .session(&mut session)
                    .await
                    .map_err(|e| StoreError::backend("upsert", e))?;
            }

            debug!(collection, id = %new_id, "upsert inserted a new document");
            Ok(assert_id(self.read_by_id(&mut session, collection, new_id).await?, Some(new_id)))
        }
        .await;

        self.finish(session, "upsert", collection, result).await
    }

    async fn create_index(&self, ctx: &CallContext, collection: &str, spec: &IndexSpec) -> StoreResult<()> {
        ctx.check()?;

        let keys = spec
            .keys
            .iter()
            .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
            .collect::<Document>();

        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(
                        IndexOptions::builder()
                            .name(spec.resolved_name())
                            .background(spec.background)
                            .expire_after(spec.ttl)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|e| StoreError::backend("create index", e))?;

        Ok(())
    }

    async fn drop_index(&self, ctx: &CallContext, collection: &str, name: &str) -> StoreResult<()> {
        ctx.check()?;

        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| StoreError::backend("drop index", e))?;

        Ok(())
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.shutdown().await
    }
}

/// Groups bulk update objects that set the same fields to the same values, so each group
/// is written with one `update_many`. Objects without an `_id` or without fields are
/// skipped. Groups keep the order of their first object.
fn group_updates(collection: &str, objects: Vec<Document>) -> StoreResult<Vec<(Document, Vec<ObjectId>)>> {
    let mut groups: Vec<(Document, Vec<ObjectId>)> = Vec::new();

    for object in objects {
        let Some(id) = document_id(&object)? else {
            debug!(collection, "skipping bulk update object without an _id");
            continue;
        };

        let fields = object
            .into_iter()
            .filter(|(field, _)| field != ID_FIELD)
            .collect::<Document>();
        if fields.is_empty() {
            continue;
        }

        match groups.iter_mut().find(|(existing, _)| *existing == fields) {
            Some((_, ids)) => ids.push(id),
            None => groups.push((fields, vec![id])),
        }
    }

    Ok(groups)
}

fn bulk_selector(ids: &[ObjectId], filter: Option<&Document>) -> Document {
    let selector = match ids {
        [id] => doc! { ID_FIELD: *id },
        _ => doc! { ID_FIELD: { "$in": ids.to_vec() } },
    };

    match filter {
        Some(filter) if !filter.is_empty() => doc! { "$and": [selector, filter.clone()] },
        _ => selector,
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    collections: HashMap<String, CollectionOptions>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            collections: HashMap::new(),
        }
    }

    /// Sets the options of one collection.
    pub fn collection(mut self, name: impl Into<String>, options: CollectionOptions) -> Self {
        self.collections.insert(name.into(), options);
        self
    }

    pub fn collections(mut self, collections: HashMap<String, CollectionOptions>) -> Self {
        self.collections.extend(collections);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        if self.database.is_empty() {
            return Err(StoreError::configuration("database name must not be empty"));
        }

        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| StoreError::Configuration(e.to_string()))?,
        )
        .map_err(|e| StoreError::Configuration(e.to_string()))?;

        info!(database = %self.database, collections = self.collections.len(), "opened MongoDB store");

        Ok(MongoDbStore::new(client, self.database, self.collections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_updates_with_identical_fields_share_one_write() {
        let (a, b, c) = (ObjectId::new(), ObjectId::new(), ObjectId::new());
        let groups = group_updates("items", vec![
            doc! { "_id": a, "note": "x" },
            doc! { "_id": b, "note": "y" },
            doc! { "note": "no id" },
            doc! { "_id": c.to_hex(), "note": "x" },
            doc! { "_id": ObjectId::new() },
        ])
        .unwrap();

        assert_eq!(groups, vec![(doc! { "note": "x" }, vec![a, c]), (doc! { "note": "y" }, vec![b])]);
    }

    #[test]
    fn bulk_selector_adds_the_filter() {
        let (a, b) = (ObjectId::new(), ObjectId::new());

        assert_eq!(bulk_selector(&[a], None), doc! { "_id": a });
        assert_eq!(bulk_selector(&[a, b], Some(&doc! {})), doc! { "_id": { "$in": [a, b] } });
        assert_eq!(
            bulk_selector(&[a], Some(&doc! { "category": { "$eq": "A" } })),
            doc! { "$and": [{ "_id": a }, { "category": { "$eq": "A" } }] }
        );
    }

    #[tokio::test]
    async fn builder_rejects_bad_configuration() {
        assert!(matches!(
            MongoDbStore::builder("mongodb://localhost:27017", "").build().await,
            Err(StoreError::Configuration(_))
        ));
        assert!(matches!(
            MongoDbStore::builder("not-a-connection-string", "db").build().await,
            Err(StoreError::Configuration(_))
        ));
    }
}
