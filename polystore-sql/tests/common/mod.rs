#![allow(dead_code)]

use bson::{Document, doc, oid::ObjectId};
use polystore_core::{options::CollectionOptions, store::DocumentStore};
use polystore_sql::SqlStore;

pub const ITEMS: &str = "items";

pub const ITEMS_SCHEMA: &str = "CREATE TABLE items (
    _id TEXT PRIMARY KEY,
    name TEXT,
    category TEXT,
    value INTEGER,
    age INTEGER,
    note TEXT,
    touched DATETIME
)";

pub fn store() -> DocumentStore<SqlStore> {
    DocumentStore::new(SqlStore::in_memory().unwrap())
}

pub async fn store_with_items() -> DocumentStore<SqlStore> {
    let store = store();
    store.backend().execute_batch(ITEMS_SCHEMA).await.unwrap();
    store
}

/// Ten items with values 10..=100; categories alternate A and B.
pub async fn seeded() -> (DocumentStore<SqlStore>, Vec<ObjectId>) {
    let store = store_with_items().await;
    let items = (1..=10)
        .map(|n| {
            doc! {
                "name": format!("item-{n}"),
                "category": if n % 2 == 1 { "A" } else { "B" },
                "value": n * 10,
                "age": n * 10,
            }
        })
        .collect::<Vec<Document>>();

    let ids = store.collection(ITEMS).insert(items).await.unwrap();
    (store, ids)
}

/// A store whose `events` collection is date sharded on `day`, with day tables for the
/// given dates (`YYYYMMDD`), one row per table labeled with its date.
pub async fn sharded(days: &[&str]) -> DocumentStore<SqlStore> {
    let backend = SqlStore::new(
        rusqlite::Connection::open_in_memory().unwrap(),
        [("events".to_string(), CollectionOptions::sharded_by("day"))].into(),
    )
    .unwrap();

    for day in days {
        let date = format!("{}-{}-{}", &day[0..4], &day[4..6], &day[6..8]);
        backend
            .execute_batch(&format!(
                "CREATE TABLE events_{day} (_id TEXT PRIMARY KEY, day DATETIME, kind TEXT, label TEXT);
                 INSERT INTO events_{day} VALUES ('{}', '{date}T12:00:00.000Z', 'click', '{day}');",
                ObjectId::new().to_hex()
            ))
            .await
            .unwrap();
    }

    DocumentStore::new(backend)
}

pub fn values(rows: &[Document], field: &str) -> Vec<i64> {
    rows.iter().map(|row| row.get_i64(field).unwrap()).collect()
}
