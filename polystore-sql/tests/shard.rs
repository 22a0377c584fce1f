mod common;

use bson::doc;
use chrono::{TimeZone, Utc};
use polystore_core::error::StoreError;

use common::sharded;

fn at(year: i32, month: u32, day: u32, hour: u32) -> bson::DateTime {
    bson::DateTime::from_chrono(Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap())
}

#[tokio::test]
async fn range_reads_only_existing_days() {
    let store = sharded(&["20240101", "20240102", "20240104"]).await;

    let rows = store
        .collection("events")
        .find(&doc! {
            "day": { "$gte": at(2024, 1, 1, 0), "$lte": at(2024, 1, 4, 23) },
            "_sort": "day",
        })
        .await
        .unwrap();

    let days = rows.iter().map(|row| row.get_str("label").unwrap()).collect::<Vec<_>>();
    assert_eq!(days, vec!["20240101", "20240102", "20240104"]);
}

#[tokio::test]
async fn count_over_shards() {
    let store = sharded(&["20240101", "20240102", "20240104"]).await;

    let count = store
        .collection("events")
        .count(&doc! { "day": { "$gte": at(2024, 1, 2, 0), "$lt": at(2024, 1, 5, 0) }, "kind": "click" })
        .await
        .unwrap();

    assert_eq!(count, 2);
}

#[tokio::test]
async fn range_without_tables_is_empty() {
    let store = sharded(&["20240101"]).await;

    let rows = store
        .collection("events")
        .find(&doc! { "day": { "$gte": at(2023, 6, 1, 0), "$lte": at(2023, 6, 2, 0) } })
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn open_range_is_a_configuration_error() {
    let store = sharded(&["20240101"]).await;

    assert!(matches!(
        store.collection("events").find(&doc! { "day": { "$gte": at(2024, 1, 1, 0) } }).await,
        Err(StoreError::Configuration(_))
    ));
}

#[tokio::test]
async fn sharding_can_be_disabled_per_call() {
    let store = sharded(&["20240101"]).await;
    store
        .backend()
        .execute_batch("CREATE TABLE events (_id TEXT PRIMARY KEY, day DATETIME, kind TEXT, label TEXT)")
        .await
        .unwrap();

    let rows = store
        .collection("events")
        .find(&doc! { "_date_sharding": false })
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn sharding_on_request_needs_a_configured_field() {
    let store = common::store_with_items().await;

    assert!(matches!(
        store.collection(common::ITEMS).find(&doc! { "_date_sharding": true }).await,
        Err(StoreError::Configuration(_))
    ));

    let rows = store
        .collection(common::ITEMS)
        .find(&doc! { "_date_sharding": "touched", "touched": { "$gte": "2024-01-01", "$lte": "2024-01-02" } })
        .await
        .unwrap();
    assert!(rows.is_empty());
}
