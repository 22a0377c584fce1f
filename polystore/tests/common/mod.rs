#![allow(dead_code)]

use polystore::{bson::oid::ObjectId, prelude::*, sql::SqlStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
#[record(collection = "items")]
pub struct Item {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub category: String,
    pub value: i64,
}

impl Item {
    pub fn new(name: &str, category: &str, value: i64) -> Self {
        Self { id: None, name: name.into(), category: category.into(), value }
    }
}

/// A store with an empty `items` table.
pub async fn store() -> DocumentStore<SqlStore> {
    let backend = SqlStore::builder().build().await.unwrap();
    backend
        .execute_batch("CREATE TABLE items (_id TEXT PRIMARY KEY, name TEXT, category TEXT, value INTEGER)")
        .await
        .unwrap();

    DocumentStore::new(backend)
}
