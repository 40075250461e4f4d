//! Durable document store on sled. Every collection shares one tree keyed `collection/id`.

use async_trait::async_trait;
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Db;

use crate::document_store::{
    ensure_object, merge_fields, resolve_server_timestamps, BatchOp, Document, DocumentStore,
    Query,
};
use crate::errors::{PortalError, PortalResult};
use crate::timefmt;

/// Why a sled transaction was aborted
#[derive(Debug)]
enum Abort {
    NotFound { collection: String, id: String },
    Invalid(String),
}

impl From<Abort> for PortalError {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::NotFound { collection, id } => PortalError::not_found(collection, id),
            Abort::Invalid(message) => PortalError::internal(message),
        }
    }
}

/// A sled-backed document store.
///
/// All collections share one tree keyed `collection/id`, so a batch spanning
/// several collections is still a single sled transaction.
pub struct SledDocumentStore {
    db: Db,
    tree: sled::Tree,
}

impl SledDocumentStore {
    pub fn open(path: &str) -> PortalResult<Self> {
        let db = sled::open(path)
            .map_err(|e| PortalError::storage(format!("open sled database at {path}"), e))?;
        let tree = db.open_tree("documents")?;
        Ok(Self { db, tree })
    }

    fn key(collection: &str, id: &str) -> Vec<u8> {
        format!("{collection}/{id}").into_bytes()
    }

    fn prefix(collection: &str) -> Vec<u8> {
        format!("{collection}/").into_bytes()
    }

    fn decode(bytes: &[u8]) -> PortalResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| PortalError::serialization("decode sled value", e))
    }

    fn apply_op(
        tx: &TransactionalTree,
        op: &BatchOp,
        now: &str,
    ) -> Result<(), ConflictableTransactionError<Abort>> {
        match op {
            BatchOp::Set {
                collection,
                id,
                data,
            } => {
                if !data.is_object() {
                    return Err(ConflictableTransactionError::Abort(Abort::Invalid(
                        "document body must be a JSON object".into(),
                    )));
                }
                let mut data = data.clone();
                resolve_server_timestamps(&mut data, now);
                let bytes = serde_json::to_vec(&data).map_err(|e| {
                    ConflictableTransactionError::Abort(Abort::Invalid(e.to_string()))
                })?;
                tx.insert(Self::key(collection, id), bytes)?;
            }
            BatchOp::Update {
                collection,
                id,
                data,
            } => {
                let key = Self::key(collection, id);
                let Some(existing) = tx.get(&key)? else {
                    return Err(ConflictableTransactionError::Abort(Abort::NotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    }));
                };
                let mut current: Value = serde_json::from_slice(&existing).map_err(|e| {
                    ConflictableTransactionError::Abort(Abort::Invalid(e.to_string()))
                })?;
                let mut patch = data.clone();
                resolve_server_timestamps(&mut patch, now);
                merge_fields(&mut current, &patch).map_err(|e| {
                    ConflictableTransactionError::Abort(Abort::Invalid(e.to_string()))
                })?;
                let bytes = serde_json::to_vec(&current).map_err(|e| {
                    ConflictableTransactionError::Abort(Abort::Invalid(e.to_string()))
                })?;
                tx.insert(key, bytes)?;
            }
            BatchOp::Delete { collection, id } => {
                tx.remove(Self::key(collection, id))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortalResult<Option<Document>> {
        match self.tree.get(Self::key(collection, id))? {
            Some(bytes) => Ok(Some(Document::new(id, Self::decode(&bytes)?))),
            None => Ok(None),
        }
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortalResult<()> {
        ensure_object(&data)?;
        self.commit(vec![BatchOp::set(collection, id, data)]).await
    }

    async fn update(&self, collection: &str, id: &str, partial: Value) -> PortalResult<()> {
        ensure_object(&partial)?;
        self.commit(vec![BatchOp::update(collection, id, partial)]).await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortalResult<()> {
        self.commit(vec![BatchOp::delete(collection, id)]).await
    }

    async fn query(&self, collection: &str, query: &Query) -> PortalResult<Vec<Document>> {
        let prefix = Self::prefix(collection);
        let mut docs = Vec::new();
        for item in self.tree.scan_prefix(&prefix) {
            let (key, bytes) = item?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            docs.push(Document::new(id, Self::decode(&bytes)?));
        }
        Ok(query.apply(docs))
    }

    async fn commit(&self, ops: Vec<BatchOp>) -> PortalResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let now = timefmt::now_string();
        let result = self.tree.transaction(|tx| {
            for op in &ops {
                Self::apply_op(tx, op, &now)?;
            }
            Ok::<(), ConflictableTransactionError<Abort>>(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(abort)) => return Err(abort.into()),
            Err(TransactionError::Storage(e)) => {
                return Err(PortalError::storage("sled transaction", e))
            }
        }

        self.db.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sled"
    }
}
