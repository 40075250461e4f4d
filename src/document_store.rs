//! Document store contract.
//!
//! The portal keeps every entity as one JSON document in a named collection.
//! Backends implement `DocumentStore`; query evaluation (predicates, ordering,
//! limits) and server-timestamp resolution are shared here so every backend
//! answers a `Query` the same way.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{PortalError, PortalResult};

/// Collection names used by the portal
pub mod collections {
    pub const LOGS: &str = "logs";
    pub const SERVICES: &str = "services";
    pub const APPLICATIONS: &str = "applications";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const USERS: &str = "users";
    pub const ACCOUNTS: &str = "accounts";
    pub const SESSIONS: &str = "sessions";
    pub const PASSWORD_RESETS: &str = "password_resets";
}

/// Key of the sentinel object replaced by the write time on every write
pub const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";

/// Sentinel value a store resolves to its own write time
pub fn server_timestamp() -> Value {
    json!({ SERVER_TIMESTAMP_KEY: true })
}

fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true)),
        _ => false,
    }
}

/// Replace every server-timestamp sentinel inside `value` with `now`
pub fn resolve_server_timestamps(value: &mut Value, now: &str) {
    if is_server_timestamp(value) {
        *value = Value::String(now.to_string());
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        _ => {}
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Deserialize the document body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> PortalResult<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| PortalError::serialization(format!("decode document {}", self.id), e))
    }
}

/// Serialize a record into a document body
pub fn to_document<T: Serialize>(record: &T) -> PortalResult<Value> {
    let value = serde_json::to_value(record)
        .map_err(|e| PortalError::serialization("encode document", e))?;
    ensure_object(&value)?;
    Ok(value)
}

/// Document bodies must be JSON objects
pub fn ensure_object(value: &Value) -> PortalResult<()> {
    if value.is_object() {
        Ok(())
    } else {
        Err(PortalError::internal("document body must be a JSON object"))
    }
}

/// Shallow merge: top-level keys of `patch` overwrite those of `target`
pub fn merge_fields(target: &mut Value, patch: &Value) -> PortalResult<()> {
    ensure_object(patch)?;
    match (target, patch) {
        (Value::Object(base), Value::Object(fields)) => {
            for (k, v) in fields {
                base.insert(k.clone(), v.clone());
            }
            Ok(())
        }
        _ => Err(PortalError::internal("document body must be a JSON object")),
    }
}

/// Resolve a dot-separated path (`context.userId`) inside a document body
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| current.get(segment))
}

/// Ordering between two JSON scalars of the same kind
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A `where` clause on a single field
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn matches(&self, data: &Value) -> bool {
        let Some(actual) = lookup(data, &self.field) else {
            // Missing fields only satisfy `!=`
            return self.op == FilterOp::Ne;
        };
        let ord = compare_values(actual, &self.value);
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Lt => ord == Some(Ordering::Less),
            FilterOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            FilterOp::Gt => ord == Some(Ordering::Greater),
            FilterOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Predicates, optional ordering and optional limit over one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub predicates: Vec<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Predicate::eq(field, value))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, data: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(data))
    }

    /// Evaluate this query over a full collection scan.
    ///
    /// As with hosted document databases, ordering on a field excludes
    /// documents that do not carry that field.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(&d.data)).collect();

        if let Some(order) = &self.order_by {
            out.retain(|d| lookup(&d.data, &order.field).is_some());
            out.sort_by(|a, b| {
                let ord = match (lookup(&a.data, &order.field), lookup(&b.data, &order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchOp {
    pub fn set(collection: &str, id: impl Into<String>, data: Value) -> Self {
        BatchOp::Set {
            collection: collection.to_string(),
            id: id.into(),
            data,
        }
    }

    pub fn update(collection: &str, id: impl Into<String>, data: Value) -> Self {
        BatchOp::Update {
            collection: collection.to_string(),
            id: id.into(),
            data,
        }
    }

    pub fn delete(collection: &str, id: impl Into<String>) -> Self {
        BatchOp::Delete {
            collection: collection.to_string(),
            id: id.into(),
        }
    }
}

/// Generate a collision-resistant document id
pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Core trait for document backends
///
/// Writes resolve server-timestamp sentinels. `commit` applies every
/// operation or none of them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> PortalResult<Option<Document>>;

    /// Create or replace a document
    async fn set(&self, collection: &str, id: &str, data: Value) -> PortalResult<()>;

    /// Merge fields into an existing document; fails with not-found otherwise
    async fn update(&self, collection: &str, id: &str, partial: Value) -> PortalResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> PortalResult<()>;

    async fn query(&self, collection: &str, query: &Query) -> PortalResult<Vec<Document>>;

    /// Apply a batch of writes atomically
    async fn commit(&self, ops: Vec<BatchOp>) -> PortalResult<()>;

    /// Backend name (e.g. "sled", "memory")
    fn name(&self) -> &str;

    /// Insert a document under a freshly generated id
    async fn add(&self, collection: &str, data: Value) -> PortalResult<String> {
        let id = new_document_id();
        self.set(collection, &id, data).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a", json!({"n": 3, "ctx": {"user": "u1"}, "ts": "2024-01-01T00:00:00.000Z"})),
            Document::new("b", json!({"n": 1, "ctx": {"user": "u2"}, "ts": "2024-01-03T00:00:00.000Z"})),
            Document::new("c", json!({"n": 2, "ctx": {"user": "u1"}})),
        ]
    }

    #[test]
    fn nested_predicate_and_ordering() {
        let q = Query::new()
            .where_eq("ctx.user", "u1")
            .order_by("n", Direction::Descending);
        let ids: Vec<_> = q.apply(docs()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn ordering_excludes_documents_missing_the_field() {
        let q = Query::new().order_by("ts", Direction::Descending).limit(5);
        let ids: Vec<_> = q.apply(docs()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn range_predicates_on_strings() {
        let q = Query::new().filter(Predicate::new(
            "ts",
            FilterOp::Lt,
            "2024-01-02T00:00:00.000Z",
        ));
        let ids: Vec<_> = q.apply(docs()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn server_timestamps_resolve_recursively() {
        let mut v = json!({"createdAt": server_timestamp(), "history": [{"at": server_timestamp()}]});
        resolve_server_timestamps(&mut v, "NOW");
        assert_eq!(v, json!({"createdAt": "NOW", "history": [{"at": "NOW"}]}));
    }

    #[test]
    fn merge_overwrites_top_level_only() {
        let mut base = json!({"a": 1, "b": {"x": 1}});
        merge_fields(&mut base, &json!({"b": {"y": 2}, "c": 3})).unwrap();
        assert_eq!(base, json!({"a": 1, "b": {"y": 2}, "c": 3}));
        assert!(merge_fields(&mut base, &json!(5)).is_err());
    }
}
