#![allow(clippy::result_large_err)] // Card helpers return AppError to carry document identity in diagnostics.

use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors at the document store seam.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let category = match &err {
            StoreError::Serialization(_) => ErrorCategory::SerializationError,
            _ => ErrorCategory::StoreError,
        };
        AppError::new(category, err.to_string())
    }
}

/// One operation inside an atomic write batch. Increment and the keyed map
/// operations are commutative, which keeps the statistics aggregates safe
/// under duplicate delivery.
#[derive(Debug, Clone)]
pub enum WriteOp {
    MergeSet {
        collection: String,
        id: String,
        value: Value,
    },
    Increment {
        collection: String,
        id: String,
        field: String,
        amount: i64,
    },
    MapPut {
        collection: String,
        id: String,
        field: String,
        key: String,
        value: Value,
    },
    MapDelete {
        collection: String,
        id: String,
        field: String,
        key: String,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Batched multi-document write applied atomically by the backing store.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn merge_set<C: Into<String>, I: Into<String>>(&mut self, collection: C, id: I, value: Value) {
        self.ops.push(WriteOp::MergeSet {
            collection: collection.into(),
            id: id.into(),
            value,
        });
    }

    pub fn increment<C: Into<String>, I: Into<String>, F: Into<String>>(
        &mut self,
        collection: C,
        id: I,
        field: F,
        amount: i64,
    ) {
        self.ops.push(WriteOp::Increment {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            amount,
        });
    }

    pub fn map_put<C: Into<String>, I: Into<String>, F: Into<String>, K: Into<String>>(
        &mut self,
        collection: C,
        id: I,
        field: F,
        key: K,
        value: Value,
    ) {
        self.ops.push(WriteOp::MapPut {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            key: key.into(),
            value,
        });
    }

    pub fn map_delete<C: Into<String>, I: Into<String>, F: Into<String>, K: Into<String>>(
        &mut self,
        collection: C,
        id: I,
        field: F,
        key: K,
    ) {
        self.ops.push(WriteOp::MapDelete {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            key: key.into(),
        });
    }

    pub fn delete<C: Into<String>, I: Into<String>>(&mut self, collection: C, id: I) {
        self.ops.push(WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        });
    }
}

/// Document database seam: per-document reads/writes plus an atomic batch
/// primitive. Per-document atomicity of `commit` is the engine's sole
/// concurrency-safety mechanism.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, collection: &str, id: &str, value: Value, merge: bool)
        -> Result<(), StoreError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
    async fn list_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Value>, StoreError>;
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// In-memory store used by the served boundary and tests. A batch is applied
/// to a working copy and swapped in whole, so a failing op leaves no partial
/// state.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc_key(collection: &str, id: &str) -> String {
        format!("{}/{}", collection, id)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(&Self::doc_key(collection, id)).cloned())
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        value: Value,
        merge: bool,
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let key = Self::doc_key(collection, id);
        if merge {
            let merged = match docs.remove(&key) {
                Some(mut existing) => {
                    deep_merge(&mut existing, &value);
                    existing
                }
                None => value,
            };
            docs.insert(key, merged);
        } else {
            docs.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.remove(&Self::doc_key(collection, id));
        Ok(())
    }

    async fn list_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Value>, StoreError> {
        let docs = self.docs.read().await;
        let scope = format!("{}/{}", collection, prefix);
        let mut keys: Vec<&String> = docs.keys().filter(|key| key.starts_with(&scope)).collect();
        keys.sort();
        Ok(keys.into_iter().map(|key| docs[key].clone()).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        let mut updated = docs.clone();
        for op in batch.ops() {
            apply_op(&mut updated, op)?;
        }
        *docs = updated;
        Ok(())
    }
}

fn apply_op(docs: &mut HashMap<String, Value>, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::MergeSet {
            collection,
            id,
            value,
        } => {
            let key = MemoryDocumentStore::doc_key(collection, id);
            match docs.get_mut(&key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    docs.insert(key, value.clone());
                }
            }
        }
        WriteOp::Increment {
            collection,
            id,
            field,
            amount,
        } => {
            let key = MemoryDocumentStore::doc_key(collection, id);
            let doc = docs.entry(key).or_insert_with(|| Value::Object(Map::new()));
            let object = doc.as_object_mut().ok_or_else(|| {
                StoreError::Backend(format!("increment target {}/{} is not an object", collection, id))
            })?;
            let current = object
                .get(field)
                .and_then(Value::as_i64)
                .unwrap_or_default();
            object.insert(field.clone(), Value::from(current + amount));
        }
        WriteOp::MapPut {
            collection,
            id,
            field,
            key: entry_key,
            value,
        } => {
            let key = MemoryDocumentStore::doc_key(collection, id);
            let doc = docs.entry(key).or_insert_with(|| Value::Object(Map::new()));
            let object = doc.as_object_mut().ok_or_else(|| {
                StoreError::Backend(format!("map target {}/{} is not an object", collection, id))
            })?;
            let map = object
                .entry(field.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let map = map.as_object_mut().ok_or_else(|| {
                StoreError::Backend(format!("field {} of {}/{} is not a map", field, collection, id))
            })?;
            map.insert(entry_key.clone(), value.clone());
        }
        WriteOp::MapDelete {
            collection,
            id,
            field,
            key: entry_key,
        } => {
            let key = MemoryDocumentStore::doc_key(collection, id);
            if let Some(map) = docs
                .get_mut(&key)
                .and_then(Value::as_object_mut)
                .and_then(|object| object.get_mut(field))
                .and_then(Value::as_object_mut)
            {
                map.remove(entry_key);
            }
        }
        WriteOp::Delete { collection, id } => {
            docs.remove(&MemoryDocumentStore::doc_key(collection, id));
        }
    }
    Ok(())
}

/// Recursive merge matching the managed database's merge-set semantics:
/// object fields merge, everything else is replaced.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value)
                    }
                    _ => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

pub const CARDS_COLLECTION: &str = "cards";
pub const ACTIVITY_COLLECTION: &str = "activity";
pub const STATS_COLLECTION: &str = "status_stats";
pub const LOV_COLLECTION: &str = "lov_cache";

/// Typed card access over the document store.
pub struct CardStore {
    store: Arc<dyn DocumentStore>,
}

impl CardStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn card_doc_id(workflow_id: &str, card_id: &str) -> String {
        format!("{}:{}", workflow_id, card_id)
    }

    pub async fn get_card(&self, workflow_id: &str, card_id: &str) -> Result<CardEntry, AppError> {
        match self.get_card_opt(workflow_id, card_id).await? {
            Some(card) => Ok(card),
            None => Err(AppError::new(
                ErrorCategory::StoreError,
                format!("card {} not found in workflow {}", card_id, workflow_id),
            )
            .with_code("CF-STORE-404")),
        }
    }

    pub async fn get_card_opt(
        &self,
        workflow_id: &str,
        card_id: &str,
    ) -> Result<Option<CardEntry>, AppError> {
        let value = self
            .store
            .get(CARDS_COLLECTION, &Self::card_doc_id(workflow_id, card_id))
            .await?;
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn put_card(&self, card: &CardEntry) -> Result<(), AppError> {
        let value = serde_json::to_value(card)?;
        self.store
            .set(
                CARDS_COLLECTION,
                &Self::card_doc_id(&card.workflow_id, &card.workflow_card_id),
                value,
                false,
            )
            .await?;
        Ok(())
    }

    /// Merge-style partial update; callers pass only the fields to change.
    pub async fn update_card(
        &self,
        workflow_id: &str,
        card_id: &str,
        partial: Value,
    ) -> Result<(), AppError> {
        self.store
            .set(
                CARDS_COLLECTION,
                &Self::card_doc_id(workflow_id, card_id),
                partial,
                true,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_card(&self, workflow_id: &str, card_id: &str) -> Result<(), AppError> {
        self.store
            .delete(CARDS_COLLECTION, &Self::card_doc_id(workflow_id, card_id))
            .await?;
        Ok(())
    }
}
