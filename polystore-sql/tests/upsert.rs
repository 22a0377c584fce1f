mod common;

use bson::{doc, oid::ObjectId};
use polystore_core::error::StoreError;

use common::{ITEMS, seeded, store_with_items};

#[tokio::test]
async fn insert_keeps_the_preset_id() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);
    let preset = ObjectId::new();

    let row = items
        .upsert(&doc! { "name": "fresh" }, &doc! { "$set": { "value": 1 } }, Some(preset))
        .await
        .unwrap();

    assert_eq!(row.get_object_id("_id").unwrap(), preset);
    assert_eq!(items.count(&doc! { "_id": preset, "name": "fresh", "value": 1 }).await.unwrap(), 1);
    assert_eq!(items.count(&doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn insert_takes_the_filter_id() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);
    let id = ObjectId::new();

    let row = items
        .upsert(&doc! { "_id": id, "category": "C" }, &doc! { "$set": { "name": "from filter" } }, None)
        .await
        .unwrap();

    assert_eq!(row.get_object_id("_id").unwrap(), id);
    assert_eq!(row.get_str("category").unwrap(), "C");
    assert_eq!(row.get_str("name").unwrap(), "from filter");
}

#[tokio::test]
async fn insert_generates_an_id() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);

    let row = items
        .upsert(&doc! { "name": "generated" }, &doc! { "value": 3 }, None)
        .await
        .unwrap();

    let id = row.get_object_id("_id").unwrap();
    let stored = items.find(&doc! { "_id": id }).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get_str("name").unwrap(), "generated");
    assert_eq!(stored[0].get_i64("value").unwrap(), 3);
}

#[tokio::test]
async fn preset_id_wins_over_filter_id() {
    let store = store_with_items().await;
    let preset = ObjectId::new();

    let row = store
        .collection(ITEMS)
        .upsert(&doc! { "_id": ObjectId::new() }, &doc! { "$set": { "name": "x" } }, Some(preset))
        .await
        .unwrap();

    assert_eq!(row.get_object_id("_id").unwrap(), preset);
}

#[tokio::test]
async fn inserted_rows_apply_the_remaining_operators() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);

    let row = items
        .upsert(&doc! { "name": "counter", "value": 10 }, &doc! { "$inc": { "value": 5 } }, None)
        .await
        .unwrap();

    assert_eq!(row.get_i64("value").unwrap(), 15);
}

#[tokio::test]
async fn existing_rows_are_updated_not_duplicated() {
    let (store, ids) = seeded().await;
    let items = store.collection(ITEMS);

    let row = items
        .upsert(&doc! { "name": "item-4" }, &doc! { "$inc": { "value": 1 }, "$set": { "note": "bumped" } }, None)
        .await
        .unwrap();

    assert_eq!(row.get_object_id("_id").unwrap(), ids[3]);
    assert_eq!(row.get_i64("value").unwrap(), 41);
    assert_eq!(row.get_str("note").unwrap(), "bumped");
    assert_eq!(items.count(&doc! {}).await.unwrap(), 10);
}

#[tokio::test]
async fn updated_row_is_read_back_even_when_the_filter_no_longer_matches() {
    let (store, ids) = seeded().await;

    let row = store
        .collection(ITEMS)
        .upsert(&doc! { "value": 50 }, &doc! { "$set": { "value": 55 } }, None)
        .await
        .unwrap();

    assert_eq!(row.get_object_id("_id").unwrap(), ids[4]);
    assert_eq!(row.get_i64("value").unwrap(), 55);
}

#[tokio::test]
async fn sharded_filters_are_rejected() {
    let store = store_with_items().await;

    assert!(matches!(
        store
            .collection(ITEMS)
            .upsert(&doc! { "_date_sharding": true }, &doc! { "$set": { "name": "x" } }, None)
            .await,
        Err(StoreError::Validation(_))
    ));
}
