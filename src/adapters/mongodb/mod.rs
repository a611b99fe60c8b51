//! MongoDB backend for the document store.

use async_trait::async_trait;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::{Client, Collection, Database};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::models::{DatabaseConfig, Document, Filter, UpdateOutcome, UPDATE_OPERATORS};
use crate::domain::ports::DocumentStore;

/// Placeholder replaced by the configured username in the connection URI.
pub const USERNAME_PLACEHOLDER: &str = "<username>";

/// Placeholder replaced by the configured password in the connection URI.
pub const PASSWORD_PLACEHOLDER: &str = "<password>";

const SELECTION_TIMEOUTS: &str = "serverSelectionTimeoutMS=3000&connectTimeoutMS=3000";

pub struct MongoDocumentStore {
    client: Client,
    database: Database,
    closed: AtomicBool,
}

impl MongoDocumentStore {
    /// Connect and ping the server. Credentials are substituted into the URI
    /// placeholders before connecting.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        if config.uri.trim().is_empty() || config.db_name.trim().is_empty() {
            return Err(StoreError::Configuration(
                "database uri and db_name cannot be empty".to_string(),
            ));
        }

        let uri = with_timeouts(&resolve_uri(config));
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|err| StoreError::backend("connect", err))?;
        let database = client.database(&config.db_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| StoreError::backend("connect", err))?;

        tracing::info!(db_name = %config.db_name, "connected to document database");

        Ok(Self {
            client,
            database,
            closed: AtomicBool::new(false),
        })
    }

    fn collection(&self, operation: &'static str, name: &str) -> StoreResult<Collection<bson::Document>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::backend(operation, "client is closed"));
        }
        require_non_empty(operation, "collection", name)?;
        Ok(self.database.collection(name))
    }
}

/// Substitute credentials into the URI placeholders, first occurrence only.
pub fn resolve_uri(config: &DatabaseConfig) -> String {
    let mut uri = config.uri.clone();
    if let Some(username) = &config.username {
        uri = uri.replacen(USERNAME_PLACEHOLDER, username, 1);
    }
    if let Some(password) = &config.password {
        uri = uri.replacen(PASSWORD_PLACEHOLDER, password, 1);
    }
    uri
}

fn with_timeouts(uri: &str) -> String {
    if uri.contains('?') {
        format!("{uri}&{SELECTION_TIMEOUTS}")
    } else {
        format!("{uri}?{SELECTION_TIMEOUTS}")
    }
}

fn to_bson(operation: &'static str, map: &Document) -> StoreResult<bson::Document> {
    bson::to_document(map).map_err(|err| StoreError::invalid_argument(operation, err.to_string()))
}

fn to_json(operation: &'static str, document: bson::Document) -> StoreResult<Document> {
    bson::from_document(document).map_err(|err| StoreError::backend(operation, err))
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(id) => id.clone(),
        other => other.to_string(),
    }
}

fn validate_update(operation: &'static str, update: &Document) -> StoreResult<()> {
    if update.is_empty() {
        return Err(StoreError::invalid_argument(operation, "update cannot be empty"));
    }
    if let Some(key) = update
        .keys()
        .find(|key| !UPDATE_OPERATORS.contains(&key.as_str()))
    {
        return Err(StoreError::invalid_argument(
            operation,
            format!("unsupported update operator {key}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn health_check(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::backend("health_check", "client is closed"));
        }
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|err| StoreError::backend("health_check", err))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.clone().shutdown().await;
    }

    async fn add_data(&self, collection: &str, document: Document) -> StoreResult<String> {
        let collection = self.collection("add_data", collection)?;
        let result = collection
            .insert_one(to_bson("add_data", &document)?)
            .await
            .map_err(|err| StoreError::backend("add_data", err))?;
        Ok(id_string(&result.inserted_id))
    }

    async fn add_multiple_data(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<String>> {
        let collection = self.collection("add_multiple_data", collection)?;
        if documents.is_empty() {
            return Err(StoreError::invalid_argument(
                "add_multiple_data",
                "documents cannot be empty",
            ));
        }
        let batch = documents
            .iter()
            .map(|document| to_bson("add_multiple_data", document))
            .collect::<StoreResult<Vec<_>>>()?;

        let result = collection
            .insert_many(batch)
            .await
            .map_err(|err| StoreError::backend("add_multiple_data", err))?;

        let mut ids: Vec<(usize, String)> = result
            .inserted_ids
            .iter()
            .map(|(index, id)| (*index, id_string(id)))
            .collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn get_data(&self, collection: &str, filter: Filter) -> StoreResult<Document> {
        let name = collection;
        let collection = self.collection("get_data", name)?;
        let found = collection
            .find_one(to_bson("get_data", &filter)?)
            .await
            .map_err(|err| StoreError::backend("get_data", err))?
            .ok_or_else(|| StoreError::not_found("get_data", format!("no document in {name}")))?;
        to_json("get_data", found)
    }

    async fn get_multiple_data(
        &self,
        collection: &str,
        filter: Filter,
    ) -> StoreResult<Vec<Document>> {
        let collection = self.collection("get_multiple_data", collection)?;
        let found: Vec<bson::Document> = collection
            .find(to_bson("get_multiple_data", &filter)?)
            .await
            .map_err(|err| StoreError::backend("get_multiple_data", err))?
            .try_collect()
            .await
            .map_err(|err| StoreError::backend("get_multiple_data", err))?;
        found
            .into_iter()
            .map(|document| to_json("get_multiple_data", document))
            .collect()
    }

    async fn update_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        let collection = self.collection("update_data", collection)?;
        validate_update("update_data", &update)?;
        let result = collection
            .update_one(to_bson("update_data", &filter)?, to_bson("update_data", &update)?)
            .await
            .map_err(|err| StoreError::backend("update_data", err))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn update_multiple_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        let collection = self.collection("update_multiple_data", collection)?;
        validate_update("update_multiple_data", &update)?;
        let result = collection
            .update_many(
                to_bson("update_multiple_data", &filter)?,
                to_bson("update_multiple_data", &update)?,
            )
            .await
            .map_err(|err| StoreError::backend("update_multiple_data", err))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_data(&self, collection: &str, filter: Filter) -> StoreResult<u64> {
        let collection = self.collection("delete_data", collection)?;
        collection
            .delete_one(to_bson("delete_data", &filter)?)
            .await
            .map(|result| result.deleted_count)
            .map_err(|err| StoreError::backend("delete_data", err))
    }

    async fn delete_multiple_data(&self, collection: &str, filter: Filter) -> StoreResult<u64> {
        let collection = self.collection("delete_multiple_data", collection)?;
        collection
            .delete_many(to_bson("delete_multiple_data", &filter)?)
            .await
            .map(|result| result.deleted_count)
            .map_err(|err| StoreError::backend("delete_multiple_data", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(uri: &str) -> DatabaseConfig {
        DatabaseConfig {
            uri: uri.to_string(),
            db_name: "inventory".to_string(),
            username: Some("svc".to_string()),
            password: Some("s3cret".to_string()),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_resolve_uri_substitutes_credentials() {
        let resolved = resolve_uri(&config("mongodb://<username>:<password>@db:27017"));
        assert_eq!(resolved, "mongodb://svc:s3cret@db:27017");
    }

    #[test]
    fn test_resolve_uri_without_placeholders() {
        let resolved = resolve_uri(&config("mongodb://db:27017"));
        assert_eq!(resolved, "mongodb://db:27017");
    }

    #[test]
    fn test_with_timeouts_appends_query() {
        assert!(with_timeouts("mongodb://db").ends_with(&format!("?{SELECTION_TIMEOUTS}")));
        assert!(with_timeouts("mongodb://db/?tls=true").contains(&format!("&{SELECTION_TIMEOUTS}")));
    }

    #[test]
    fn test_update_requires_operators() {
        let mut update = Document::new();
        update.insert("qty".into(), serde_json::json!(1));
        assert!(validate_update("update_data", &update).is_err());

        let mut update = Document::new();
        update.insert("$set".into(), serde_json::json!({"qty": 1}));
        assert!(validate_update("update_data", &update).is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_config() {
        let result = MongoDocumentStore::connect(&DatabaseConfig::default()).await;
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }
}
