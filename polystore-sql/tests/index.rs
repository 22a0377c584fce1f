mod common;

use std::time::Duration;

use polystore_core::{error::StoreError, index::IndexSpec, query::SortDirection};

use common::{ITEMS, store_with_items};

async fn index_names(store: &polystore_core::store::DocumentStore<polystore_sql::SqlStore>) -> Vec<String> {
    let rows = store
        .collection(ITEMS)
        .find(&bson::doc! { "_collection": "sqlite_master", "type": "index", "tbl_name": ITEMS, "_sort": "name" })
        .await
        .unwrap();

    rows.iter()
        .map(|row| row.get_str("name").unwrap().to_string())
        .filter(|name| !name.starts_with("sqlite_autoindex"))
        .collect()
}

#[tokio::test]
async fn create_and_drop() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);

    let spec = IndexSpec::new([("category", SortDirection::Asc), ("value", SortDirection::Desc)]);
    items.create_index(&spec).await.unwrap();
    items.create_index(&spec).await.unwrap();
    items
        .create_index(&IndexSpec::new([("touched", SortDirection::Asc)]).name("expiry").ttl(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(index_names(&store).await, vec!["items_category_1_value_n1", "items_expiry"]);

    items.drop_index("category_1_value_-1").await.unwrap();
    items.drop_index("expiry").await.unwrap();
    assert!(index_names(&store).await.is_empty());
}

#[tokio::test]
async fn invalid_specs_are_rejected() {
    let store = store_with_items().await;
    let items = store.collection(ITEMS);

    assert!(matches!(
        items.create_index(&IndexSpec::new(Vec::<(String, SortDirection)>::new())).await,
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        items
            .create_index(
                &IndexSpec::new([("a", SortDirection::Asc), ("b", SortDirection::Asc)]).ttl(Duration::from_secs(1))
            )
            .await,
        Err(StoreError::Validation(_))
    ));
}
