//! In-process document store with equality filters and `$set`/`$unset`/`$inc`
//! updates.

use async_trait::async_trait;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{require_non_empty, StoreError, StoreResult};
use crate::domain::models::{filter_matches, Document, Filter, UpdateOutcome, UPDATE_OPERATORS};
use crate::domain::ports::DocumentStore;

/// Field holding the document id.
pub const ID_FIELD: &str = "_id";

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    closed: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn ensure_open(&self, operation: &'static str) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::backend(operation, "client is closed"));
        }
        Ok(())
    }

    async fn insert(
        &self,
        operation: &'static str,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<String>> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());
        for mut document in documents {
            let id = match document.get(ID_FIELD) {
                Some(Value::String(id)) => id.clone(),
                Some(other) => other.to_string(),
                None => {
                    let id = Uuid::new_v4().simple().to_string();
                    document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    id
                }
            };
            let duplicate = ids.contains(&id)
                || stored
                    .iter()
                    .any(|existing| existing.get(ID_FIELD) == document.get(ID_FIELD));
            if duplicate {
                return Err(StoreError::backend(
                    operation,
                    format!("duplicate key {ID_FIELD}: {id}"),
                ));
            }
            ids.push(id);
            prepared.push(document);
        }

        stored.extend(prepared);
        Ok(ids)
    }

    async fn update(
        &self,
        operation: &'static str,
        collection: &str,
        filter: &Filter,
        update: &Document,
        limit: Option<usize>,
    ) -> StoreResult<UpdateOutcome> {
        validate_update(operation, update)?;

        let mut collections = self.collections.write().await;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        // Every matched document is updated on a copy first; nothing is
        // written back unless all of them succeed.
        let mut outcome = UpdateOutcome::default();
        let mut staged = Vec::new();
        for (index, document) in stored
            .iter()
            .enumerate()
            .filter(|(_, doc)| filter_matches(filter, doc))
            .take(limit.unwrap_or(usize::MAX))
        {
            outcome.matched += 1;
            let mut next = document.clone();
            if apply_update(operation, &mut next, update)? {
                staged.push((index, next));
            }
        }

        outcome.modified = u64::try_from(staged.len()).unwrap_or(u64::MAX);
        for (index, next) in staged {
            stored[index] = next;
        }
        Ok(outcome)
    }

    async fn delete(&self, collection: &str, filter: &Filter, limit: Option<usize>) -> u64 {
        let mut collections = self.collections.write().await;
        let Some(stored) = collections.get_mut(collection) else {
            return 0;
        };

        let mut remaining = limit.unwrap_or(usize::MAX);
        let before = stored.len();
        stored.retain(|doc| {
            if remaining > 0 && filter_matches(filter, doc) {
                remaining -= 1;
                return false;
            }
            true
        });
        u64::try_from(before - stored.len()).unwrap_or(u64::MAX)
    }
}

fn validate_update(operation: &'static str, update: &Document) -> StoreResult<()> {
    if update.is_empty() {
        return Err(StoreError::invalid_argument(operation, "update cannot be empty"));
    }
    for (key, fields) in update {
        if !UPDATE_OPERATORS.contains(&key.as_str()) {
            return Err(StoreError::invalid_argument(
                operation,
                format!("unsupported update operator {key}"),
            ));
        }
        let Some(fields) = fields.as_object() else {
            return Err(StoreError::invalid_argument(
                operation,
                format!("{key} expects an object"),
            ));
        };
        for (field, value) in fields {
            if field == ID_FIELD {
                return Err(StoreError::invalid_argument(
                    operation,
                    format!("{ID_FIELD} is immutable"),
                ));
            }
            if key == "$inc" && !value.is_number() {
                return Err(StoreError::invalid_argument(
                    operation,
                    format!("$inc delta for {field} must be numeric"),
                ));
            }
        }
    }
    Ok(())
}

/// Apply `update` to `document`, returning true if anything changed.
fn apply_update(
    operation: &'static str,
    document: &mut Document,
    update: &Document,
) -> StoreResult<bool> {
    let mut changed = false;
    for (operator, fields) in update {
        let Some(fields) = fields.as_object() else {
            continue;
        };
        for (field, value) in fields {
            match operator.as_str() {
                "$set" => {
                    if document.get(field) != Some(value) {
                        document.insert(field.clone(), value.clone());
                        changed = true;
                    }
                }
                "$unset" => changed |= document.remove(field).is_some(),
                "$inc" => {
                    let current = document.get(field).cloned().unwrap_or(Value::from(0));
                    let next = add_numbers(&current, value).ok_or_else(|| {
                        StoreError::backend(operation, format!("cannot $inc non-numeric field {field}"))
                    })?;
                    if current != next || !document.contains_key(field) {
                        document.insert(field.clone(), next);
                        changed = true;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(changed)
}

fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    let (Value::Number(current), Value::Number(delta)) = (current, delta) else {
        return None;
    };
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let sum = current.as_f64()? + delta.as_f64()?;
    Number::from_f64(sum).map(Value::Number)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_open("health_check")
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn add_data(&self, collection: &str, document: Document) -> StoreResult<String> {
        self.ensure_open("add_data")?;
        require_non_empty("add_data", "collection", collection)?;
        let ids = self.insert("add_data", collection, vec![document]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StoreError::backend("add_data", "no id assigned"))
    }

    async fn add_multiple_data(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<String>> {
        self.ensure_open("add_multiple_data")?;
        require_non_empty("add_multiple_data", "collection", collection)?;
        if documents.is_empty() {
            return Err(StoreError::invalid_argument(
                "add_multiple_data",
                "documents cannot be empty",
            ));
        }
        self.insert("add_multiple_data", collection, documents).await
    }

    async fn get_data(&self, collection: &str, filter: Filter) -> StoreResult<Document> {
        self.ensure_open("get_data")?;
        require_non_empty("get_data", "collection", collection)?;
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| filter_matches(&filter, doc)))
            .cloned()
            .ok_or_else(|| StoreError::not_found("get_data", format!("no document in {collection}")))
    }

    async fn get_multiple_data(
        &self,
        collection: &str,
        filter: Filter,
    ) -> StoreResult<Vec<Document>> {
        self.ensure_open("get_multiple_data")?;
        require_non_empty("get_multiple_data", "collection", collection)?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filter_matches(&filter, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        self.ensure_open("update_data")?;
        require_non_empty("update_data", "collection", collection)?;
        self.update("update_data", collection, &filter, &update, Some(1))
            .await
    }

    async fn update_multiple_data(
        &self,
        collection: &str,
        filter: Filter,
        update: Document,
    ) -> StoreResult<UpdateOutcome> {
        self.ensure_open("update_multiple_data")?;
        require_non_empty("update_multiple_data", "collection", collection)?;
        self.update("update_multiple_data", collection, &filter, &update, None)
            .await
    }

    async fn delete_data(&self, collection: &str, filter: Filter) -> StoreResult<u64> {
        self.ensure_open("delete_data")?;
        require_non_empty("delete_data", "collection", collection)?;
        Ok(self.delete(collection, &filter, Some(1)).await)
    }

    async fn delete_multiple_data(&self, collection: &str, filter: Filter) -> StoreResult<u64> {
        self.ensure_open("delete_multiple_data")?;
        require_non_empty("delete_multiple_data", "collection", collection)?;
        Ok(self.delete(collection, &filter, None).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_add_assigns_ids() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .add_data("orders", doc(json!({"sku": "a-1"})))
            .await
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let fetched = store
            .get_data("orders", doc(json!({"sku": "a-1"})))
            .await
            .unwrap();
        assert_eq!(fetched.get(ID_FIELD), Some(&Value::String(id)));
    }

    #[tokio::test]
    async fn test_add_multiple_preserves_order_and_rejects_duplicates() {
        let store = InMemoryDocumentStore::new();
        let ids = store
            .add_multiple_data(
                "orders",
                vec![doc(json!({"_id": "o-1"})), doc(json!({"_id": "o-2"}))],
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["o-1", "o-2"]);

        let err = store
            .add_data("orders", doc(json!({"_id": "o-1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));

        let err = store.add_multiple_data("orders", vec![]).await.unwrap_err();
        assert!(err.is_local());
        assert_eq!(store.count("orders").await, 2);
    }

    #[tokio::test]
    async fn test_update_operators() {
        let store = InMemoryDocumentStore::new();
        store
            .add_multiple_data(
                "items",
                vec![
                    doc(json!({"kind": "a", "qty": 1, "tag": "x"})),
                    doc(json!({"kind": "a", "qty": 5})),
                ],
            )
            .await
            .unwrap();

        let outcome = store
            .update_multiple_data(
                "items",
                doc(json!({"kind": "a"})),
                doc(json!({"$inc": {"qty": 2}, "$unset": {"tag": ""}})),
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 2, modified: 2 });
        assert_eq!(outcome.to_string(), "2 document(s) have been updated");

        let items = store
            .get_multiple_data("items", Filter::new())
            .await
            .unwrap();
        assert_eq!(items[0].get("qty"), Some(&json!(3)));
        assert!(items[0].get("tag").is_none());
        assert_eq!(items[1].get("qty"), Some(&json!(7)));

        let outcome = store
            .update_data("items", doc(json!({"qty": 3})), doc(json!({"$set": {"qty": 3}})))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });
    }

    #[tokio::test]
    async fn test_failed_update_leaves_documents_untouched() {
        let store = InMemoryDocumentStore::new();
        store
            .add_multiple_data(
                "items",
                vec![
                    doc(json!({"_id": "a", "k": 1, "qty": 1})),
                    doc(json!({"_id": "b", "k": 1, "qty": "x"})),
                ],
            )
            .await
            .unwrap();

        let err = store
            .update_multiple_data(
                "items",
                doc(json!({"k": 1})),
                doc(json!({"$set": {"flag": true}, "$inc": {"qty": 1}})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));

        let first = store.get_data("items", doc(json!({"_id": "a"}))).await.unwrap();
        assert_eq!(first, doc(json!({"_id": "a", "k": 1, "qty": 1})));
        let second = store.get_data("items", doc(json!({"_id": "b"}))).await.unwrap();
        assert_eq!(second, doc(json!({"_id": "b", "k": 1, "qty": "x"})));
    }

    #[tokio::test]
    async fn test_update_validated_before_any_write() {
        let store = InMemoryDocumentStore::new();
        store
            .add_data("items", doc(json!({"_id": "a", "a": 1, "b": 1})))
            .await
            .unwrap();

        let err = store
            .update_data(
                "items",
                Filter::new(),
                doc(json!({"$inc": {"a": 1, "b": "x"}})),
            )
            .await
            .unwrap_err();
        assert!(err.is_local());

        let err = store
            .update_data("items", Filter::new(), doc(json!({"$set": {"_id": "z"}})))
            .await
            .unwrap_err();
        assert!(err.is_local());

        let stored = store.get_data("items", Filter::new()).await.unwrap();
        assert_eq!(stored, doc(json!({"_id": "a", "a": 1, "b": 1})));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_operator() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .update_data("items", Filter::new(), doc(json!({"qty": 3})))
            .await
            .unwrap_err();
        assert!(err.is_local());
    }

    #[tokio::test]
    async fn test_delete_single_and_multiple() {
        let store = InMemoryDocumentStore::new();
        store
            .add_multiple_data(
                "items",
                vec![
                    doc(json!({"kind": "a"})),
                    doc(json!({"kind": "a"})),
                    doc(json!({"kind": "b"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_data("items", doc(json!({"kind": "a"}))).await.unwrap(), 1);
        assert_eq!(
            store
                .delete_multiple_data("items", Filter::new())
                .await
                .unwrap(),
            2
        );
        assert!(matches!(
            store.get_data("items", Filter::new()).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_store_fails() {
        let store = InMemoryDocumentStore::new();
        store.close().await;
        assert!(store.health_check().await.is_err());
        assert!(store.add_data("items", Document::new()).await.is_err());
    }
}
