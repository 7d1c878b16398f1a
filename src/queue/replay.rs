use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::operation::{OperationType, SyncOperation};
use crate::storage::{Document, Filter, Store, Update, ID_FIELD};

/// Re-runs the unit of work recorded in a queued row.
#[async_trait]
pub trait OperationReplay: Send + Sync {
    async fn replay(&self, op: &SyncOperation) -> anyhow::Result<Value>;
}

/// Applies a row's payload to the record store, using the row's entity as the collection.
pub struct StoreReplay {
    store: Arc<dyn Store>,
}

impl StoreReplay {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

fn payload_object(op: &SyncOperation) -> anyhow::Result<&Map<String, Value>> {
    op.payload.as_object().ok_or_else(|| {
        anyhow!(
            "{} on '{}' needs an object payload",
            op.kind.as_str(),
            op.entity
        )
    })
}

fn payload_id(doc: &Document) -> anyhow::Result<String> {
    crate::storage::document_id(doc).ok_or_else(|| anyhow!("payload has no '{ID_FIELD}' field"))
}

#[async_trait]
impl OperationReplay for StoreReplay {
    async fn replay(&self, op: &SyncOperation) -> anyhow::Result<Value> {
        match op.kind {
            OperationType::Create => {
                let doc = payload_object(op)?.clone();
                self.store
                    .insert(&op.entity, doc)
                    .await
                    .with_context(|| format!("replaying create on '{}'", op.entity))?;
                Ok(op.payload.clone())
            }
            OperationType::Update => {
                let doc = payload_object(op)?;
                let id = payload_id(doc)?;
                let updates: Vec<Update> = doc
                    .iter()
                    .filter(|(field, _)| field.as_str() != ID_FIELD)
                    .map(|(field, value)| match value {
                        Value::Null => Update::Unset(field.clone()),
                        other => Update::Set(field.clone(), other.clone()),
                    })
                    .collect();
                let filter = Filter::ids([id.clone()]);
                if self.store.count(&op.entity, &filter).await? == 0 {
                    bail!("{} '{}' no longer exists", op.entity, id);
                }
                self.store.update_many(&op.entity, &filter, &updates).await?;
                Ok(op.payload.clone())
            }
            OperationType::Delete => {
                let id = payload_id(payload_object(op)?)?;
                let deleted = self
                    .store
                    .delete_many(&op.entity, &Filter::ids([id.clone()]))
                    .await?;
                if deleted == 0 {
                    Ok(Value::Null)
                } else {
                    Ok(serde_json::json!({ "id": id }))
                }
            }
            OperationType::Reconcile => {
                let filter = match op.payload.as_object() {
                    Some(doc) if doc.contains_key(ID_FIELD) => Filter::ids([payload_id(doc)?]),
                    _ => return Ok(Value::Array(Vec::new())),
                };
                let rows = self.store.find(&op.entity, &filter, None).await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
        }
    }
}

/// Maps entity names to replay handlers, with an optional catch-all.
#[derive(Default, Clone)]
pub struct ReplayRegistry {
    handlers: HashMap<String, Arc<dyn OperationReplay>>,
    fallback: Option<Arc<dyn OperationReplay>>,
}

impl ReplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, entity: &str, handler: Arc<dyn OperationReplay>) -> Self {
        self.handlers.insert(entity.to_string(), handler);
        self
    }

    pub fn with_fallback(mut self, handler: Arc<dyn OperationReplay>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn resolve(&self, entity: &str) -> Option<Arc<dyn OperationReplay>> {
        self.handlers
            .get(entity)
            .cloned()
            .or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::operation::SyncRequest;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn op(kind: OperationType, payload: Value) -> SyncOperation {
        let request = SyncRequest::new("classes", kind).with_payload(payload);
        SyncOperation::start(&request, 3, Utc::now())
    }

    #[tokio::test]
    async fn store_replay_applies_create_update_delete() {
        let store = Arc::new(MemoryStore::new());
        let replay = StoreReplay::new(store.clone());

        replay
            .replay(&op(OperationType::Create, json!({"id": "c1", "name": "Math"})))
            .await
            .unwrap();
        replay
            .replay(&op(OperationType::Update, json!({"id": "c1", "name": "Algebra"})))
            .await
            .unwrap();
        let rows = store.find("classes", &Filter::All, None).await.unwrap();
        assert_eq!(rows[0]["name"], json!("Algebra"));

        let found = replay
            .replay(&op(OperationType::Reconcile, json!({"id": "c1"})))
            .await
            .unwrap();
        assert_eq!(found.as_array().map(Vec::len), Some(1));

        let deleted = replay
            .replay(&op(OperationType::Delete, json!({"id": "c1"})))
            .await
            .unwrap();
        assert_eq!(deleted, json!({"id": "c1"}));
        assert_eq!(store.count("classes", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_of_missing_record_fails() {
        let replay = StoreReplay::new(Arc::new(MemoryStore::new()));
        let err = replay
            .replay(&op(OperationType::Update, json!({"id": "ghost", "name": "x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no longer exists"));
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected() {
        let replay = StoreReplay::new(Arc::new(MemoryStore::new()));
        assert!(replay
            .replay(&op(OperationType::Create, json!("oops")))
            .await
            .is_err());
    }

    #[test]
    fn registry_prefers_specific_handler_over_fallback() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let specific: Arc<dyn OperationReplay> = Arc::new(StoreReplay::new(store.clone()));
        let fallback: Arc<dyn OperationReplay> = Arc::new(StoreReplay::new(store));

        let registry = ReplayRegistry::new()
            .register("users", specific.clone())
            .with_fallback(fallback.clone());

        assert!(Arc::ptr_eq(&registry.resolve("users").unwrap(), &specific));
        assert!(Arc::ptr_eq(&registry.resolve("grades").unwrap(), &fallback));
        assert!(ReplayRegistry::new().resolve("users").is_none());
    }
}
