//! In-memory document store
//!
//! Backs the integration tests and the CLI dry-run path. Mirrors the
//! store contract closely enough to assert on dispatch behavior: it keeps
//! an operation log and honors the not-found and create-document rules.

use async_trait::async_trait;
use bytes::Bytes;
use cb_sink_core::prelude::*;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

/// Kind of store operation, recorded for dispatch assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Replace,
    MutateIn,
    ConditionalWrite,
    Remove,
}

/// In-process document store
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Value>>,
    ops: Mutex<Vec<(StoreOp, String)>>,
    fail_ids: HashSet<String>,
    running: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for every operation touching the given id
    pub fn with_failure(mut self, id: impl Into<String>) -> Self {
        self.fail_ids.insert(id.into());
        self
    }

    /// Seed a document, bypassing the operation log
    pub async fn seed(&self, id: impl Into<String>, value: Value) {
        self.docs.write().await.insert(id.into(), value);
    }

    /// Current document for an id
    pub async fn get(&self, id: &str) -> Option<Value> {
        self.docs.read().await.get(id).cloned()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Operations seen so far, in completion order
    pub fn operations(&self) -> Vec<(StoreOp, String)> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: StoreOp, id: &str) -> Result<()> {
        self.ops.lock().unwrap().push((op, id.to_string()));
        if self.fail_ids.contains(id) {
            return Err(SinkError::store(format!("injected failure for '{}'", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for MemoryStore {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn replace(
        &self,
        id: &str,
        content: Bytes,
        _durability: Durability,
        _expiry: Option<Duration>,
    ) -> Result<()> {
        self.record(StoreOp::Replace, id)?;
        let value: Value = serde_json::from_slice(&content)
            .map_err(|e| SinkError::serialization_with_source("Invalid content", e))?;
        self.docs.write().await.insert(id.to_string(), value);
        Ok(())
    }

    async fn mutate_in(
        &self,
        id: &str,
        patch: &PatchSpec,
        content: Bytes,
        _durability: Durability,
    ) -> Result<()> {
        self.record(StoreOp::MutateIn, id)?;

        let mut docs = self.docs.write().await;
        if !patch.create_document && !docs.contains_key(id) {
            return Err(SinkError::not_found(id));
        }
        let doc = docs
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        let mut node = doc;
        let mut segments = patch.path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let map = node
                .as_object_mut()
                .ok_or_else(|| SinkError::store(format!("Path '{}' is not an object", patch.path)))?;

            if segments.peek().is_none() {
                match patch.operation {
                    SubDocOperation::Insert => {
                        if map.contains_key(segment) {
                            return Err(SinkError::store(format!(
                                "Path '{}' already exists in document '{}'",
                                patch.path, id
                            )));
                        }
                        let value: Value = serde_json::from_slice(&content).map_err(|e| {
                            SinkError::serialization_with_source("Invalid patch content", e)
                        })?;
                        map.insert(segment.to_string(), value);
                    }
                    SubDocOperation::Upsert => {
                        let value: Value = serde_json::from_slice(&content).map_err(|e| {
                            SinkError::serialization_with_source("Invalid patch content", e)
                        })?;
                        map.insert(segment.to_string(), value);
                    }
                    SubDocOperation::Remove => {
                        map.remove(segment).ok_or_else(|| {
                            SinkError::store(format!(
                                "Path '{}' not found in document '{}'",
                                patch.path, id
                            ))
                        })?;
                    }
                }
                return Ok(());
            }

            node = match map.entry(segment.to_string()) {
                serde_json::map::Entry::Occupied(entry) => entry.into_mut(),
                serde_json::map::Entry::Vacant(entry) => {
                    if !patch.create_parents {
                        return Err(SinkError::store(format!(
                            "Parent path '{}' not found in document '{}'",
                            segment, id
                        )));
                    }
                    entry.insert(Value::Object(Map::new()))
                }
            };
        }
        Ok(())
    }

    async fn conditional_write(
        &self,
        id: &str,
        where_fields: &[String],
        content: Bytes,
        create_document: bool,
        _durability: Durability,
    ) -> Result<()> {
        self.record(StoreOp::ConditionalWrite, id)?;

        let fields: Map<String, Value> = match serde_json::from_slice(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(SinkError::serialization(
                    "Conditional write requires a top-level JSON object",
                ))
            }
            Err(e) => {
                return Err(SinkError::serialization_with_source(
                    "Record content is not valid JSON",
                    e,
                ))
            }
        };
        for field in where_fields {
            if !fields.contains_key(field) {
                return Err(SinkError::config(format!(
                    "Conditional write predicate field '{}' missing from record content",
                    field
                )));
            }
        }

        let mut docs = self.docs.write().await;
        let matches: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| {
                where_fields
                    .iter()
                    .all(|f| doc.get(f) == fields.get(f))
            })
            .map(|(id, _)| id.clone())
            .collect();

        if matches.is_empty() {
            if !create_document {
                return Err(SinkError::not_found(id));
            }
            docs.insert(id.to_string(), Value::Object(fields));
            return Ok(());
        }

        for matched in matches {
            if let Some(Value::Object(doc)) = docs.get_mut(&matched) {
                for (name, value) in &fields {
                    doc.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str, _durability: Durability) -> Result<()> {
        self.record(StoreOp::Remove, id)?;
        match self.docs.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(SinkError::not_found(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    fn patch(operation: SubDocOperation, create_document: bool) -> PatchSpec {
        PatchSpec {
            path: "meta.tag".to_string(),
            operation,
            create_parents: true,
            create_document,
        }
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.remove("ghost", Durability::default()).await.unwrap_err();
        assert!(matches!(err, SinkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_mutate_in_creates_parents_and_document() {
        let store = MemoryStore::new();
        store
            .mutate_in(
                "d1",
                &patch(SubDocOperation::Upsert, true),
                bytes(json!("x")),
                Durability::default(),
            )
            .await
            .unwrap();
        assert_eq!(store.get("d1").await.unwrap(), json!({"meta": {"tag": "x"}}));
    }

    #[tokio::test]
    async fn test_mutate_in_missing_document_without_create() {
        let store = MemoryStore::new();
        let err = store
            .mutate_in(
                "d1",
                &patch(SubDocOperation::Upsert, false),
                bytes(json!("x")),
                Durability::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_conditional_write_updates_matches() {
        let store = MemoryStore::new();
        store.seed("a", json!({"user": 1, "city": "Oslo"})).await;
        store.seed("b", json!({"user": 2, "city": "Oslo"})).await;

        store
            .conditional_write(
                "ignored",
                &["user".to_string()],
                bytes(json!({"user": 1, "city": "Bergen"})),
                false,
                Durability::default(),
            )
            .await
            .unwrap();

        assert_eq!(store.get("a").await.unwrap()["city"], "Bergen");
        assert_eq!(store.get("b").await.unwrap()["city"], "Oslo");
    }

    #[tokio::test]
    async fn test_conditional_write_creates_when_allowed() {
        let store = MemoryStore::new();
        store
            .conditional_write(
                "new-doc",
                &["user".to_string()],
                bytes(json!({"user": 3})),
                true,
                Durability::default(),
            )
            .await
            .unwrap();
        assert_eq!(store.get("new-doc").await.unwrap(), json!({"user": 3}));

        let store = MemoryStore::new();
        let err = store
            .conditional_write(
                "new-doc",
                &["user".to_string()],
                bytes(json!({"user": 3})),
                false,
                Durability::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::NotFound { .. }));
    }
}
