//! Runtime backend selection from a serialized configuration.

use std::{collections::HashMap, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use polystore_core::{
    backend::StoreBackend,
    error::{StoreError, StoreResult},
    options::CollectionOptions,
    store::DocumentStore,
};

/// The backend a [`StoreConfig`] opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// A SQLite database file, or an in-memory database without a path.
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Mongodb { uri: String, database: String },
}

/// A backend plus the options of its collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub collections: HashMap<String, CollectionOptions>,
}

impl StoreConfig {
    pub fn from_json(text: &str) -> StoreResult<Self> {
        serde_json::from_str(text).map_err(|e| StoreError::Configuration(format!("invalid store config: {e}")))
    }
}

impl FromStr for StoreConfig {
    type Err = StoreError;

    fn from_str(text: &str) -> StoreResult<Self> {
        Self::from_json(text)
    }
}

/// Opens the configured backend behind dynamic dispatch.
///
/// # Errors
///
/// Returns a [`StoreError::Configuration`] when the backend's feature is not enabled or
/// the backend cannot be opened.
pub async fn connect(config: StoreConfig) -> StoreResult<DocumentStore<Box<dyn StoreBackend>>> {
    let StoreConfig { backend, collections } = config;

    let backend = match backend {
        BackendConfig::Sqlite { path } => open_sqlite(path, collections).await?,
        BackendConfig::Mongodb { uri, database } => open_mongodb(&uri, &database, collections).await?,
    };

    Ok(DocumentStore::new(backend))
}

#[cfg(feature = "sql")]
async fn open_sqlite(
    path: Option<PathBuf>,
    collections: HashMap<String, CollectionOptions>,
) -> StoreResult<Box<dyn StoreBackend>> {
    use polystore_core::backend::StoreBackendBuilder;

    let mut builder = polystore_sql::SqlStore::builder().collections(collections);
    if let Some(path) = path {
        builder = builder.path(path);
    }

    Ok(Box::new(builder.build().await?))
}

#[cfg(not(feature = "sql"))]
async fn open_sqlite(
    _path: Option<PathBuf>,
    _collections: HashMap<String, CollectionOptions>,
) -> StoreResult<Box<dyn StoreBackend>> {
    Err(StoreError::configuration("polystore was built without the `sql` feature"))
}

#[cfg(feature = "mongodb")]
async fn open_mongodb(
    uri: &str,
    database: &str,
    collections: HashMap<String, CollectionOptions>,
) -> StoreResult<Box<dyn StoreBackend>> {
    use polystore_core::backend::StoreBackendBuilder;

    Ok(Box::new(
        polystore_mongodb::MongoDbStore::builder(uri, database)
            .collections(collections)
            .build()
            .await?,
    ))
}

#[cfg(not(feature = "mongodb"))]
async fn open_mongodb(
    _uri: &str,
    _database: &str,
    _collections: HashMap<String, CollectionOptions>,
) -> StoreResult<Box<dyn StoreBackend>> {
    Err(StoreError::configuration("polystore was built without the `mongodb` feature"))
}

#[cfg(test)]
mod tests {
    use polystore_core::options::DateSharding;

    use super::*;

    #[test]
    fn parses_backends_and_collections() {
        let config = StoreConfig::from_json(
            r#"{
                "backend": { "kind": "sqlite", "path": "data.db" },
                "collections": { "events": { "date_sharding": { "field": "day", "enabled": false } } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendConfig::Sqlite { path: Some(PathBuf::from("data.db")) });
        assert_eq!(
            config.collections["events"].date_sharding,
            Some(DateSharding { field: "day".into(), enabled: false })
        );

        let config: StoreConfig =
            r#"{ "backend": { "kind": "mongodb", "uri": "mongodb://localhost", "database": "app" } }"#
                .parse()
                .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Mongodb { uri: "mongodb://localhost".into(), database: "app".into() }
        );
        assert!(config.collections.is_empty());
    }

    #[test]
    fn malformed_config_is_a_configuration_error() {
        assert!(matches!(
            StoreConfig::from_json(r#"{ "backend": { "kind": "oracle" } }"#),
            Err(StoreError::Configuration(_))
        ));
    }
}
