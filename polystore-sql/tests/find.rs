mod common;

use bson::doc;
use polystore_core::error::StoreError;

use common::{ITEMS, seeded, store_with_items, values};

// ── Filters ─────────────────────────────────────────────────────

#[tokio::test]
async fn or_matches_either_branch() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);
    items
        .insert(vec![
            doc! { "name": "one", "category": "A", "value": 1 },
            doc! { "name": "two", "category": "B", "value": 20 },
            doc! { "name": "three", "category": "A", "value": 3 },
        ])
        .await
        .unwrap();

    let rows = items
        .find(&doc! { "$or": [{ "category": "A" }, { "value": 20 }] })
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn range_bounds_are_exclusive() {
    let (store, _) = seeded().await;

    let rows = store
        .collection(ITEMS)
        .find(&doc! { "age": { "$gt": 20, "$lt": 50 }, "_sort": "age" })
        .await
        .unwrap();

    assert_eq!(values(&rows, "age"), vec![30, 40]);
}

#[tokio::test]
async fn reserved_keys_only_match_everything() {
    let (store, _) = seeded().await;

    let rows = store
        .collection(ITEMS)
        .find(&doc! { "_sort": { "value": -1 }, "_limit": 3, "_offset": 1 })
        .await
        .unwrap();

    assert_eq!(values(&rows, "value"), vec![90, 80, 70]);
}

#[tokio::test]
async fn ne_and_nin_include_null_columns() {
    let (store, _) = seeded().await;
    let items = store.collection(ITEMS);
    items.insert(vec![doc! { "name": "blank" }]).await.unwrap();

    assert_eq!(items.count(&doc! { "category": { "$ne": "A" } }).await.unwrap(), 6);
    assert_eq!(items.count(&doc! { "category": { "$nin": ["A"] } }).await.unwrap(), 6);
    assert_eq!(items.count(&doc! { "category": null }).await.unwrap(), 1);
}

#[tokio::test]
async fn text_operators() {
    let (store, _) = seeded().await;
    let items = store.collection(ITEMS);

    assert_eq!(items.count(&doc! { "name": { "$i": "ITEM-3" } }).await.unwrap(), 1);
    assert_eq!(items.count(&doc! { "name": { "$text": "EM-1" } }).await.unwrap(), 2);
    assert_eq!(items.count(&doc! { "name": { "$regex": "^item-[1-3]$" } }).await.unwrap(), 3);
}

#[tokio::test]
async fn ids_round_trip() {
    let (store, ids) = seeded().await;

    let rows = store.collection(ITEMS).find(&doc! { "_id": ids[4] }).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_object_id("_id").unwrap(), ids[4]);
    assert_eq!(rows[0].get_i64("value").unwrap(), 50);
}

// ── Pages and overrides ─────────────────────────────────────────

#[tokio::test]
async fn pages_carry_the_total_when_asked() {
    let (store, _) = seeded().await;

    let page = store
        .collection(ITEMS)
        .find_page(&doc! { "category": "A", "_limit": 2, "_count": true, "_sort": "value" })
        .await
        .unwrap();

    assert_eq!(values(&page.items, "value"), vec![10, 30]);
    assert_eq!(page.total, Some(5));
    assert_eq!(page.next_offset(), Some(2));
}

#[tokio::test]
async fn collection_override_reads_another_table() {
    let (store, _) = seeded().await;
    store
        .backend()
        .execute_batch("CREATE TABLE archive (_id TEXT PRIMARY KEY, value INTEGER); INSERT INTO archive VALUES ('65a1b2c3d4e5f60718293a4b', 7);")
        .await
        .unwrap();

    let rows = store
        .collection(ITEMS)
        .find(&doc! { "_collection": "archive" })
        .await
        .unwrap();

    assert_eq!(values(&rows, "value"), vec![7]);
}

// ── Rejections ──────────────────────────────────────────────────

#[tokio::test]
async fn malformed_filters_fail_before_any_statement() {
    let (store, _) = seeded().await;
    let items = store.collection(ITEMS);

    assert!(matches!(
        items.find(&doc! { "value": { "$near": 1 } }).await,
        Err(StoreError::Translation(_))
    ));
    assert!(matches!(
        items.find(&doc! { "_limit": -1 }).await,
        Err(StoreError::Translation(_))
    ));
    assert!(matches!(
        store.collection("").find(&doc! {}).await,
        Err(StoreError::Configuration(_))
    ));
}
