//! The SQLite-backed [`StoreBackend`].

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use mea::mutex::Mutex;
use regex::Regex;
use rusqlite::{Connection, functions::FunctionFlags, types::ValueRef};
use tracing::{info, warn};

use polystore_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    context::CallContext,
    error::{BoxError, StoreError, StoreResult},
    index::IndexSpec,
    options::CollectionOptions,
    pipeline::Pipeline,
    query::Query,
    shard::sharding_field,
    update::UpdateSpec,
};

use crate::{
    ast::{AggregateFunc, ColumnRef, CreateIndex, DropIndex, Ident, Relation, Select, SelectItem},
    catalog::SqliteCatalog,
    exec::Executor,
    filter::compile_predicate,
    pipeline::compile_pipeline,
    shard::shard_relation,
    write,
};

/// A document store over one SQLite connection.
///
/// Collections are tables whose columns are the document fields, with the object id
/// stored as hex text in `_id`. Calls are serialized on the connection; each write runs
/// in its own transaction.
///
/// # Example
///
/// ```ignore
/// use polystore_sql::SqlStore;
/// use polystore::{backend::StoreBackendBuilder, store::DocumentStore};
///
/// let store = DocumentStore::new(SqlStore::builder().path("app.db").build().await?);
/// let items = store.collection("items");
/// let rows = items.find(&doc! { "category": "A", "_limit": 10 }).await?;
/// ```
pub struct SqlStore {
    conn: Mutex<Connection>,
    collections: HashMap<String, CollectionOptions>,
    location: String,
}

impl fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlStore")
            .field("location", &self.location)
            .field("collections", &self.collections)
            .finish_non_exhaustive()
    }
}

impl SqlStore {
    /// Wraps an open connection and registers the functions the compiled SQL relies on.
    pub fn new(conn: Connection, collections: HashMap<String, CollectionOptions>) -> StoreResult<Self> {
        register_regexp(&conn).map_err(|e| StoreError::backend("register regexp", e))?;

        let location = conn
            .path()
            .filter(|path| !path.is_empty())
            .unwrap_or(":memory:")
            .to_string();
        info!(location = %location, collections = collections.len(), "opened SQLite store");

        Ok(Self { conn: Mutex::new(conn), collections, location })
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::backend("open", e))?;
        Self::new(conn, HashMap::new())
    }

    pub fn builder() -> SqlStoreBuilder {
        SqlStoreBuilder::default()
    }

    /// Options of `collection`, if any were configured.
    pub fn collection_options(&self, collection: &str) -> Option<&CollectionOptions> {
        self.collections.get(collection)
    }

    /// Runs raw SQL (schema setup, fixtures) outside any transaction.
    pub async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.conn
            .lock()
            .await
            .execute_batch(sql)
            .map_err(|e| StoreError::backend("execute batch", e))
    }

    /// The relation a read of `collection` selects from, honoring `_collection` and date
    /// sharding. `None` means a sharded range without any table.
    fn read_relation(&self, conn: &Connection, collection: &str, query: &Query) -> StoreResult<Option<Relation>> {
        let name = query.target(collection);
        let table = Ident::table(name)?;

        match sharding_field(query, self.collections.get(name))? {
            None => Ok(Some(Relation::Table(table))),
            Some(field) => shard_relation(name, &field, query, &SqliteCatalog::new(conn)),
        }
    }
}

#[async_trait]
impl StoreBackend for SqlStore {
    async fn insert_documents(
        &self,
        ctx: &CallContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<ObjectId>> {
        let mut conn = self.conn.lock().await;
        write::insert(&mut conn, ctx, collection, documents)
    }

    async fn find_documents(&self, ctx: &CallContext, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        let filter = compile_predicate(&query.filter, None)?;
        let order_by = query
            .sort
            .iter()
            .map(|sort| Ok((ColumnRef::new(Ident::new(&sort.field)?), sort.direction)))
            .collect::<StoreResult<Vec<_>>>()?;

        let conn = self.conn.lock().await;
        ctx.check()?;

        let Some(from) = self.read_relation(&conn, collection, &query)? else {
            return Ok(Vec::new());
        };

        let mut select = Select::star(from);
        select.filter = filter;
        select.order_by = order_by;
        select.limit = query.limit;
        select.offset = query.offset;

        Executor::new(&conn, ctx).query("find", &select)
    }

    async fn count_documents(&self, ctx: &CallContext, collection: &str, query: Query) -> StoreResult<u64> {
        let filter = compile_predicate(&query.filter, None)?;

        let conn = self.conn.lock().await;
        ctx.check()?;

        let Some(from) = self.read_relation(&conn, collection, &query)? else {
            return Ok(0);
        };

        let mut select = Select::star(from);
        select.items = vec![SelectItem::Aggregate { func: AggregateFunc::Count, arg: None, alias: Ident::new("count")? }];
        select.filter = filter;

        Executor::new(&conn, ctx).count("count", &select)
    }

    async fn aggregate(&self, ctx: &CallContext, collection: &str, pipeline: Pipeline) -> StoreResult<Vec<Document>> {
        let table = Ident::table(collection)?;

        let conn = self.conn.lock().await;
        ctx.check()?;

        let select = compile_pipeline(&table, &pipeline, &SqliteCatalog::new(&conn))?;
        Executor::new(&conn, ctx).query("aggregate", &select)
    }

    async fn bulk_update(
        &self,
        ctx: &CallContext,
        collection: &str,
        objects: Vec<Document>,
        filter: Option<Query>,
    ) -> StoreResult<u64> {
        let collection = filter.as_ref().map_or(collection, |query| query.target(collection)).to_string();

        let mut conn = self.conn.lock().await;
        write::bulk_update(&mut conn, ctx, &collection, objects, filter)
    }

    async fn update_all(&self, ctx: &CallContext, collection: &str, query: Query, update: UpdateSpec) -> StoreResult<u64> {
        let mut conn = self.conn.lock().await;
        write::update_all(&mut conn, ctx, query.target(collection), &query, &update)
    }

    async fn upsert(
        &self,
        ctx: &CallContext,
        collection: &str,
        query: Query,
        update: UpdateSpec,
        preset: Option<ObjectId>,
    ) -> StoreResult<Document> {
        let mut conn = self.conn.lock().await;
        write::upsert(&mut conn, ctx, query.target(collection), &query, &update, preset)
    }

    async fn create_index(&self, ctx: &CallContext, collection: &str, spec: &IndexSpec) -> StoreResult<()> {
        let table = Ident::table(collection)?;
        let statement = CreateIndex {
            name: index_ident(&table, &spec.resolved_name())?,
            table,
            columns: spec
                .keys
                .iter()
                .map(|(field, direction)| Ok((Ident::new(field)?, *direction)))
                .collect::<StoreResult<Vec<_>>>()?,
        };

        if spec.is_ttl() {
            warn!(collection, index = %statement.name, "TTL is not enforced by SQLite; creating a plain index");
        }

        let conn = self.conn.lock().await;
        Executor::new(&conn, ctx).execute("create index", &statement)?;

        Ok(())
    }

    async fn drop_index(&self, ctx: &CallContext, collection: &str, name: &str) -> StoreResult<()> {
        let table = Ident::table(collection)?;
        let statement = DropIndex { name: index_ident(&table, name)? };

        let conn = self.conn.lock().await;
        Executor::new(&conn, ctx).execute("drop index", &statement)?;

        Ok(())
    }
}

/// Index names are global in SQLite, so they are prefixed with the table.
fn index_ident(table: &Ident, name: &str) -> StoreResult<Ident> {
    Ident::new(&format!("{table}_{}", name.replace('-', "n")))
}

/// Backs the `REGEXP` operator with the `regex` crate. Patterns are compiled once per
/// statement.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> =
                ctx.get_or_create_aux(0, |value| -> Result<Regex, BoxError> { Ok(Regex::new(value.as_str()?)?) })?;

            Ok(match ctx.get_raw(1) {
                ValueRef::Text(text) => pattern.is_match(&String::from_utf8_lossy(text)),
                _ => false,
            })
        },
    )
}

/// Builds a [`SqlStore`] over a database file, or an in-memory database when no path is
/// set.
#[derive(Debug, Default)]
pub struct SqlStoreBuilder {
    path: Option<PathBuf>,
    collections: HashMap<String, CollectionOptions>,
}

impl SqlStoreBuilder {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
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
impl StoreBackendBuilder for SqlStoreBuilder {
    type Backend = SqlStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        let conn = match &self.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| StoreError::backend("open", e))?;

        SqlStore::new(conn, self.collections)
    }
}
