//! In-memory document store for ephemeral mode and tests.
//!
//! A batch is checked in full before any op is applied, so a rejected batch
//! leaves every collection as it was without copying the store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::document_store::{
    ensure_object, merge_fields, resolve_server_timestamps, BatchOp, Document, DocumentStore,
    Query,
};
use crate::errors::{PortalError, PortalResult};
use crate::timefmt;

type Collections = HashMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        let cols = self.collections.read().await;
        cols.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    /// Reject the batch if any op would fail. `Update` needs its target to
    /// exist once the earlier ops of the same batch have run.
    fn check_batch(cols: &Collections, ops: &[BatchOp]) -> PortalResult<()> {
        let mut staged: HashMap<(&str, &str), bool> = HashMap::new();
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                } => {
                    ensure_object(data)?;
                    staged.insert((collection.as_str(), id.as_str()), true);
                }
                BatchOp::Update {
                    collection,
                    id,
                    data,
                } => {
                    ensure_object(data)?;
                    let exists = staged
                        .get(&(collection.as_str(), id.as_str()))
                        .copied()
                        .unwrap_or_else(|| {
                            cols.get(collection).is_some_and(|c| c.contains_key(id))
                        });
                    if !exists {
                        return Err(PortalError::not_found(collection.clone(), id.clone()));
                    }
                }
                BatchOp::Delete { collection, id } => {
                    staged.insert((collection.as_str(), id.as_str()), false);
                }
            }
        }
        Ok(())
    }

    fn apply_op(cols: &mut Collections, op: BatchOp, now: &str) -> PortalResult<()> {
        match op {
            BatchOp::Set {
                collection,
                id,
                mut data,
            } => {
                ensure_object(&data)?;
                resolve_server_timestamps(&mut data, now);
                cols.entry(collection).or_default().insert(id, data);
            }
            BatchOp::Update {
                collection,
                id,
                mut data,
            } => {
                resolve_server_timestamps(&mut data, now);
                let existing = cols
                    .get_mut(&collection)
                    .and_then(|c| c.get_mut(&id))
                    .ok_or_else(|| PortalError::not_found(collection.clone(), id.clone()))?;
                merge_fields(existing, &data)?;
            }
            BatchOp::Delete { collection, id } => {
                if let Some(c) = cols.get_mut(&collection) {
                    c.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortalResult<Option<Document>> {
        let cols = self.collections.read().await;
        Ok(cols
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortalResult<()> {
        self.commit(vec![BatchOp::set(collection, id, data)]).await
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> PortalResult<()> {
        self.commit(vec![BatchOp::update(collection, id, partial)]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortalResult<()> {
        self.commit(vec![BatchOp::delete(collection, id)]).await
    }

    async fn query(&self, collection: &str, query: &Query) -> PortalResult<Vec<Document>> {
        let cols = self.collections.read().await;
        let docs = cols
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    async fn commit(&self, ops: Vec<BatchOp>) -> PortalResult<()> {
        let now = timefmt::now_string();
        let mut cols = self.collections.write().await;
        Self::check_batch(&cols, &ops)?;
        for op in ops {
            Self::apply_op(&mut cols, op, &now)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_store::server_timestamp;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_update_delete() {
        let store = MemoryDocumentStore::new();
        store
            .set("services", "s1", json!({"name": "Birth", "createdAt": server_timestamp()}))
            .await
            .unwrap();
        store
            .update("services", "s1", json!({"isActive": false}))
            .await
            .unwrap();

        let doc = store.get("services", "s1").await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Birth");
        assert_eq!(doc.data["isActive"], false);
        assert!(doc.data["createdAt"].is_string());

        store.delete("services", "s1").await.unwrap();
        assert!(store.get("services", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store.update("services", "nope", json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, PortalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn batch_may_update_what_it_creates() {
        let store = MemoryDocumentStore::new();
        store
            .commit(vec![
                BatchOp::set("logs", "l1", json!({"m": 1})),
                BatchOp::update("logs", "l1", json!({"m": 2})),
            ])
            .await
            .unwrap();
        assert_eq!(store.get("logs", "l1").await.unwrap().unwrap().data["m"], 2);

        let err = store
            .commit(vec![
                BatchOp::set("logs", "l2", json!({"m": 1})),
                BatchOp::delete("logs", "l1"),
                BatchOp::update("logs", "l1", json!({"m": 3})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound { .. }));
        // nothing from the rejected batch was applied
        assert!(store.get("logs", "l2").await.unwrap().is_none());
        assert_eq!(store.get("logs", "l1").await.unwrap().unwrap().data["m"], 2);
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let store = MemoryDocumentStore::new();
        let result = store
            .commit(vec![
                BatchOp::set("logs", "l1", json!({"m": 1})),
                BatchOp::update("logs", "missing", json!({"m": 2})),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count("logs").await, 0);
    }
}
