//! Document store backed by SQLite.
//!
//! Documents are JSON bodies addressed by a slash separated path such as
//! `users/{uid}/friends/{peerId}`: everything before the last segment is the
//! collection, the last segment is the document id. All writes go through
//! [`WriteBatch`], which commits inside a single SQL transaction and then
//! publishes one [`DocumentChange`] per written document to live watchers.

pub mod batch;
pub mod paths;
pub mod query;

pub use batch::{FieldUpdate, WriteBatch};
pub use query::{Direction, Filter, Query, MAX_IN_FILTER_IDS};

use anyhow::{bail, Context};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::Stream;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Value,
    pub update_time: DateTime<Utc>,
}

impl Document {
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.data.clone())
            .with_context(|| format!("decoding document {}", self.path()))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        lookup_field(&self.data, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Written,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub collection: String,
    pub doc_id: String,
    pub kind: ChangeKind,
    /// Body after the write; `None` for deletes.
    pub data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    pub pool: SqlitePool,
    changes: broadcast::Sender<DocumentChange>,
}

impl DocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("[STORE] Connecting to {}", database_url);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        if !in_memory {
            let file_path = database_url
                .strip_prefix("sqlite://")
                .or_else(|| database_url.strip_prefix("sqlite:"))
                .unwrap_or(database_url);
            let file_path = file_path.split('?').next().unwrap_or(file_path);
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                    info!("[STORE] Created directory {:?}", parent);
                }
            }
        }

        // Every pooled connection to `:memory:` would open its own empty database,
        // so in-memory stores keep exactly one connection alive for their lifetime.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let connect_url = if in_memory || database_url.contains("mode=") {
            database_url.to_string()
        } else if database_url.contains('?') {
            format!("{}&mode=rwc", database_url)
        } else {
            format!("{}?mode=rwc", database_url)
        };
        let pool = options.connect(&connect_url).await?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    /// Fresh in-memory store with its schema applied.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let store = Self::connect("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, doc_id)
            );
        "#).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Option<Document>> {
        let (collection, doc_id) = split_path(path)?;
        let row = sqlx::query("SELECT data, updated_at FROM documents WHERE collection = ? AND doc_id = ?")
            .bind(collection)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(document_from_parts(
                collection,
                doc_id,
                &row.get::<String, _>("data"),
                row.get::<i64, _>("updated_at"),
            )?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Create or overwrite a document.
    pub async fn set(&self, path: &str, data: Value) -> anyhow::Result<()> {
        let mut batch = self.batch();
        batch.set(path, data);
        batch.commit().await
    }

    /// Apply field transforms to an existing document; fails when it is missing.
    pub async fn update(&self, path: &str, updates: Vec<(String, FieldUpdate)>) -> anyhow::Result<()> {
        let mut batch = self.batch();
        batch.update(path, updates);
        batch.commit().await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let mut batch = self.batch();
        batch.delete(path);
        batch.commit().await
    }

    pub async fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query("SELECT doc_id, data, updated_at FROM documents WHERE collection = ? ORDER BY doc_id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                document_from_parts(
                    collection,
                    &r.get::<String, _>("doc_id"),
                    &r.get::<String, _>("data"),
                    r.get::<i64, _>("updated_at"),
                )
            })
            .collect()
    }

    pub async fn query(&self, query: &Query) -> anyhow::Result<Vec<Document>> {
        query.validate()?;
        let docs = self.list(&query.collection).await?;
        Ok(query.apply(docs))
    }

    pub fn batch(&self) -> WriteBatch<'_> {
        WriteBatch::new(self)
    }

    /// Live changes to documents directly inside `collection`.
    pub fn watch(&self, collection: &str) -> impl Stream<Item = DocumentChange> + Send + 'static {
        let rx = self.changes.subscribe();
        let collection = collection.to_string();
        futures_util::stream::unfold(rx, move |mut rx| {
            let collection = collection.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(change) if change.collection == collection => return Some((change, rx)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("[STORE] Watcher on {} lagged, skipped {} changes", collection, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
    }

    pub(crate) fn publish(&self, changes: Vec<DocumentChange>) {
        for change in changes {
            // No receivers is the common case.
            let _ = self.changes.send(change);
        }
    }
}

pub(crate) fn split_path(path: &str) -> anyhow::Result<(&str, &str)> {
    let segments = path.split('/').collect::<Vec<_>>();
    if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
        bail!("invalid document path: {}", path);
    }
    match path.rsplit_once('/') {
        Some((collection, id)) => Ok((collection, id)),
        None => bail!("invalid document path: {}", path),
    }
}

pub(crate) fn lookup_field<'a>(data: &'a Value, name: &str) -> Option<&'a Value> {
    name.split('.').try_fold(data, |value, key| value.get(key))
}

fn document_from_parts(collection: &str, doc_id: &str, data: &str, updated_at: i64) -> anyhow::Result<Document> {
    Ok(Document {
        collection: collection.to_string(),
        id: doc_id.to_string(),
        data: serde_json::from_str(data).with_context(|| format!("corrupt document {}/{}", collection, doc_id))?,
        update_time: Utc.timestamp_millis_opt(updated_at).single().unwrap_or_else(Utc::now),
    })
}
