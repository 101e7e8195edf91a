use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use log::{info, warn};

use crate::common::models::{from_document, to_document, AppNotification, NotificationType, UserData};
use crate::store::{paths, ChangeKind, Direction, DocumentStore, FieldUpdate, Query, WriteBatch};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<DocumentStore>,
}

/// Queue a notification for `recipient` inside a larger batch.
pub(crate) fn stage_notification(
    batch: &mut WriteBatch<'_>,
    recipient: &str,
    notification: &AppNotification,
) -> anyhow::Result<()> {
    batch.set(&paths::notification(recipient, &notification.id), to_document(notification)?);
    Ok(())
}

impl NotificationService {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        recipient: &str,
        notification_type: NotificationType,
        sender: Option<&UserData>,
        message: &str,
    ) -> Option<AppNotification> {
        let notification = AppNotification::new(notification_type, sender, message.to_string());
        let mut batch = self.store.batch();
        if let Err(e) = stage_notification(&mut batch, recipient, &notification) {
            warn!("[NOTIFICATIONS] Could not encode notification: {}", e);
            return None;
        }
        match batch.commit().await {
            Ok(()) => {
                info!("[NOTIFICATIONS] {:?} for {}", notification_type, recipient);
                Some(notification)
            }
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to create notification for {}: {}", recipient, e);
                None
            }
        }
    }

    /// Newest first.
    pub async fn get_notifications(&self, uid: &str) -> Vec<AppNotification> {
        let query = Query::collection(&paths::notifications(uid)).order_by("createdAt", Direction::Descending);
        match self.store.query(&query).await {
            Ok(docs) => docs.iter().filter_map(|d| from_document(&d.data).ok()).collect(),
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to list notifications for {}: {}", uid, e);
                Vec::new()
            }
        }
    }

    pub async fn unread_count(&self, uid: &str) -> usize {
        let query = Query::collection(&paths::notifications(uid)).where_eq("isRead", false);
        match self.store.query(&query).await {
            Ok(docs) => docs.len(),
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to count unread for {}: {}", uid, e);
                0
            }
        }
    }

    pub async fn mark_as_read(&self, uid: &str, notification_id: &str) -> bool {
        let result = self
            .store
            .update(
                &paths::notification(uid, notification_id),
                vec![("isRead".to_string(), FieldUpdate::set(true))],
            )
            .await;
        if let Err(e) = &result {
            warn!("[NOTIFICATIONS] Failed to mark {} read: {}", notification_id, e);
        }
        result.is_ok()
    }

    pub async fn mark_all_as_read(&self, uid: &str) -> bool {
        let query = Query::collection(&paths::notifications(uid)).where_eq("isRead", false);
        let unread = match self.store.query(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to list unread for {}: {}", uid, e);
                return false;
            }
        };
        let mut batch = self.store.batch();
        for doc in &unread {
            batch.update(&doc.path(), vec![("isRead".to_string(), FieldUpdate::set(true))]);
        }
        match batch.commit().await {
            Ok(()) => true,
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to mark all read for {}: {}", uid, e);
                false
            }
        }
    }

    pub async fn delete(&self, uid: &str, notification_id: &str) -> bool {
        match self.store.delete(&paths::notification(uid, notification_id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to delete {}: {}", notification_id, e);
                false
            }
        }
    }

    pub async fn clear_all(&self, uid: &str) -> bool {
        let docs = match self.store.list(&paths::notifications(uid)).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("[NOTIFICATIONS] Failed to list notifications for {}: {}", uid, e);
                return false;
            }
        };
        let mut batch = self.store.batch();
        for doc in &docs {
            batch.delete(&doc.path());
        }
        batch.commit().await.is_ok()
    }

    /// Notifications as they arrive for `uid`.
    pub fn watch_notifications(&self, uid: &str) -> impl Stream<Item = AppNotification> + Send + 'static {
        self.store.watch(&paths::notifications(uid)).filter_map(|change| async move {
            match (change.kind, change.data) {
                (ChangeKind::Written, Some(data)) => from_document(&data).ok(),
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> NotificationService {
        NotificationService::new(Arc::new(DocumentStore::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn read_flags_and_counts() {
        let notifications = service().await;
        let first = notifications.create("u1", NotificationType::Nudge, None, "focus!").await.unwrap();
        notifications.create("u1", NotificationType::Nudge, None, "again").await.unwrap();
        assert_eq!(notifications.unread_count("u1").await, 2);

        assert!(notifications.mark_as_read("u1", &first.id).await);
        assert_eq!(notifications.unread_count("u1").await, 1);
        assert!(notifications.mark_all_as_read("u1").await);
        assert_eq!(notifications.unread_count("u1").await, 0);
        assert!(!notifications.mark_as_read("u1", "missing").await);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let notifications = service().await;
        let n = notifications.create("u1", NotificationType::Nudge, None, "a").await.unwrap();
        notifications.create("u1", NotificationType::GroupJoined, None, "b").await.unwrap();
        assert!(notifications.delete("u1", &n.id).await);
        assert_eq!(notifications.get_notifications("u1").await.len(), 1);
        assert!(notifications.clear_all("u1").await);
        assert!(notifications.get_notifications("u1").await.is_empty());
    }

    #[tokio::test]
    async fn watcher_receives_new_notifications() {
        let notifications = service().await;
        let mut incoming = Box::pin(notifications.watch_notifications("u1"));
        notifications.create("u1", NotificationType::FriendRequest, None, "hello").await.unwrap();
        let received = incoming.next().await.unwrap();
        assert_eq!(received.message, "hello");
        assert_eq!(received.notification_type, NotificationType::FriendRequest);
    }
}
