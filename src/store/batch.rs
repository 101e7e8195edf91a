use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use log::{debug, error};
use serde_json::{Map, Value};
use sqlx::Row;

use super::{split_path, ChangeKind, DocumentChange, DocumentStore};

/// Transform applied to one field of an existing document. Field names may use dots
/// to reach into nested maps.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    Delete,
    Increment(f64),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    ServerTimestamp,
}

impl FieldUpdate {
    pub fn set<T: Into<Value>>(value: T) -> Self {
        FieldUpdate::Set(value.into())
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Set { path: String, data: Value },
    Update { path: String, updates: Vec<(String, FieldUpdate)> },
    Delete { path: String },
}

/// Writes committed together in one transaction: either all of them land or none do.
pub struct WriteBatch<'a> {
    store: &'a DocumentStore,
    ops: Vec<WriteOp>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(store: &'a DocumentStore) -> Self {
        Self { store, ops: Vec::new() }
    }

    pub fn set(&mut self, path: &str, data: Value) -> &mut Self {
        self.ops.push(WriteOp::Set { path: path.to_string(), data });
        self
    }

    pub fn update(&mut self, path: &str, updates: Vec<(String, FieldUpdate)>) -> &mut Self {
        self.ops.push(WriteOp::Update { path: path.to_string(), updates });
        self
    }

    pub fn delete(&mut self, path: &str) -> &mut Self {
        self.ops.push(WriteOp::Delete { path: path.to_string() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub async fn commit(self) -> anyhow::Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        let mut tx = self.store.pool.begin().await?;
        let mut changes = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            match op {
                WriteOp::Set { path, data } => {
                    let (collection, doc_id) = split_path(path)?;
                    if !data.is_object() {
                        bail!("document body for {} must be an object", path);
                    }
                    sqlx::query("INSERT OR REPLACE INTO documents (collection, doc_id, data, updated_at) VALUES (?, ?, ?, ?)")
                        .bind(collection)
                        .bind(doc_id)
                        .bind(data.to_string())
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                    changes.push(DocumentChange {
                        collection: collection.to_string(),
                        doc_id: doc_id.to_string(),
                        kind: ChangeKind::Written,
                        data: Some(data.clone()),
                    });
                }
                WriteOp::Update { path, updates } => {
                    let (collection, doc_id) = split_path(path)?;
                    let row = sqlx::query("SELECT data FROM documents WHERE collection = ? AND doc_id = ?")
                        .bind(collection)
                        .bind(doc_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                    let Some(row) = row else {
                        bail!("document not found: {}", path);
                    };
                    let mut data: Value = serde_json::from_str(&row.get::<String, _>("data"))
                        .with_context(|| format!("corrupt document {}", path))?;
                    for (field, update) in updates {
                        apply_update(&mut data, field, update, now)
                            .with_context(|| format!("updating {} on {}", field, path))?;
                    }
                    sqlx::query("UPDATE documents SET data = ?, updated_at = ? WHERE collection = ? AND doc_id = ?")
                        .bind(data.to_string())
                        .bind(now)
                        .bind(collection)
                        .bind(doc_id)
                        .execute(&mut *tx)
                        .await?;
                    changes.push(DocumentChange {
                        collection: collection.to_string(),
                        doc_id: doc_id.to_string(),
                        kind: ChangeKind::Written,
                        data: Some(data),
                    });
                }
                WriteOp::Delete { path } => {
                    let (collection, doc_id) = split_path(path)?;
                    sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_id = ?")
                        .bind(collection)
                        .bind(doc_id)
                        .execute(&mut *tx)
                        .await?;
                    changes.push(DocumentChange {
                        collection: collection.to_string(),
                        doc_id: doc_id.to_string(),
                        kind: ChangeKind::Deleted,
                        data: None,
                    });
                }
            }
        }

        tx.commit().await.map_err(|e| {
            error!("[STORE] Batch of {} writes failed to commit: {}", self.ops.len(), e);
            e
        })?;
        debug!("[STORE] Committed batch of {} writes", self.ops.len());
        self.store.publish(changes);
        Ok(())
    }
}

fn apply_update(data: &mut Value, field: &str, update: &FieldUpdate, now_millis: i64) -> anyhow::Result<()> {
    let (parents, leaf) = match field.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, field),
    };
    let mut target = data
        .as_object_mut()
        .ok_or_else(|| anyhow!("document body is not an object"))?;
    if let Some(parents) = parents {
        for key in parents.split('.') {
            let entry = target
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            target = entry
                .as_object_mut()
                .ok_or_else(|| anyhow!("field {} is not a map", key))?;
        }
    }

    match update {
        FieldUpdate::Set(value) => {
            target.insert(leaf.to_string(), value.clone());
        }
        FieldUpdate::Delete => {
            target.remove(leaf);
        }
        FieldUpdate::Increment(by) => {
            let next = match target.get(leaf) {
                Some(Value::Number(n)) if n.is_i64() && by.fract() == 0.0 => {
                    Value::from(n.as_i64().unwrap_or(0) + *by as i64)
                }
                Some(Value::Number(n)) => Value::from(n.as_f64().unwrap_or(0.0) + by),
                _ if by.fract() == 0.0 => Value::from(*by as i64),
                _ => Value::from(*by),
            };
            target.insert(leaf.to_string(), next);
        }
        FieldUpdate::ArrayUnion(values) => {
            let entry = target.entry(leaf.to_string()).or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            if let Some(items) = entry.as_array_mut() {
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }
        FieldUpdate::ArrayRemove(values) => {
            if let Some(items) = target.get_mut(leaf).and_then(Value::as_array_mut) {
                items.retain(|item| !values.contains(item));
            }
        }
        FieldUpdate::ServerTimestamp => {
            target.insert(leaf.to_string(), Value::from(now_millis));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_applies_transforms() {
        let store = DocumentStore::in_memory().await.unwrap();
        store
            .set("groups/g1", json!({"memberCount": 1, "memberIds": ["a"], "name": "G"}))
            .await
            .unwrap();

        store
            .update(
                "groups/g1",
                vec![
                    ("memberCount".into(), FieldUpdate::Increment(1.0)),
                    ("memberIds".into(), FieldUpdate::ArrayUnion(vec![json!("b"), json!("a")])),
                    ("meta.touchedAt".into(), FieldUpdate::ServerTimestamp),
                    ("name".into(), FieldUpdate::Delete),
                ],
            )
            .await
            .unwrap();

        let doc = store.get("groups/g1").await.unwrap().unwrap();
        assert_eq!(doc.data["memberCount"], json!(2));
        assert_eq!(doc.data["memberIds"], json!(["a", "b"]));
        assert!(doc.field("meta.touchedAt").unwrap().is_i64());
        assert!(doc.data.get("name").is_none());

        store
            .update("groups/g1", vec![("memberIds".into(), FieldUpdate::ArrayRemove(vec![json!("a")]))])
            .await
            .unwrap();
        let doc = store.get("groups/g1").await.unwrap().unwrap();
        assert_eq!(doc.data["memberIds"], json!(["b"]));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = DocumentStore::in_memory().await.unwrap();
        let result = store
            .update("users/ghost", vec![("x".into(), FieldUpdate::set(1))])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_writes() {
        let store = DocumentStore::in_memory().await.unwrap();
        let mut batch = store.batch();
        batch.set("users/a/friends/b", json!({"status": "pending"}));
        batch.update("users/missing", vec![("x".into(), FieldUpdate::set(1))]);
        assert!(batch.commit().await.is_err());

        assert!(store.get("users/a/friends/b").await.unwrap().is_none());
    }
}
