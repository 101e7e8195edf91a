//! Friend relationships.
//!
//! A friendship is one logical edge stored as two projections: `users/A/friends/B`
//! describes B as seen by A and `users/B/friends/A` describes A as seen by B. Both
//! carry the same `status` and exactly one of them has `isRequester = true`. Every
//! mutation writes both projections in one batch so the pair never diverges.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::common::models::{from_document, to_document, AppNotification, Friend, FriendStatus, NotificationType, UserData};
use crate::services::notification_service::stage_notification;
use crate::services::user_service::UserService;
use crate::store::{paths, DocumentStore, FieldUpdate, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipStatus {
    None,
    PendingOutgoing,
    PendingIncoming,
    Friends,
}

#[derive(Clone)]
pub struct FriendService {
    store: Arc<DocumentStore>,
    users: UserService,
}

impl FriendService {
    pub fn new(store: Arc<DocumentStore>, users: UserService) -> Self {
        Self { store, users }
    }

    async fn get_record(&self, owner: &str, peer: &str) -> anyhow::Result<Option<Friend>> {
        match self.store.get(&paths::friend(owner, peer)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn send_friend_request(&self, requester_id: &str, target_id: &str) -> bool {
        if requester_id == target_id {
            warn!("[FRIENDS] {} tried to befriend themselves", requester_id);
            return false;
        }
        match self.try_send(requester_id, target_id).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("[FRIENDS] Request {} -> {} failed: {:#}", requester_id, target_id, e);
                false
            }
        }
    }

    async fn try_send(&self, requester_id: &str, target_id: &str) -> anyhow::Result<bool> {
        if self.store.exists(&paths::friend(requester_id, target_id)).await?
            || self.store.exists(&paths::friend(target_id, requester_id)).await?
        {
            warn!("[FRIENDS] {} and {} already connected", requester_id, target_id);
            return Ok(false);
        }
        let (Some(requester), Some(target)) = (
            self.users.get_user_data(requester_id).await,
            self.users.get_user_data(target_id).await,
        ) else {
            warn!("[FRIENDS] Unknown user in request {} -> {}", requester_id, target_id);
            return Ok(false);
        };

        let added_at = Utc::now();
        let requester_side = Friend::from_peer(&target, FriendStatus::Pending, true, added_at);
        let target_side = Friend::from_peer(&requester, FriendStatus::Pending, false, added_at);
        let notification = AppNotification::new(
            NotificationType::FriendRequest,
            Some(&requester),
            format!("{} sent you a friend request", requester.username),
        );

        let mut batch = self.store.batch();
        batch.set(&paths::friend(requester_id, target_id), to_document(&requester_side)?);
        batch.set(&paths::friend(target_id, requester_id), to_document(&target_side)?);
        stage_notification(&mut batch, target_id, &notification)?;
        batch.commit().await?;

        info!("[FRIENDS] Request sent {} -> {}", requester_id, target_id);
        Ok(true)
    }

    /// `user_id` accepts the pending request previously sent by `requester_id`.
    pub async fn accept_friend_request(&self, user_id: &str, requester_id: &str) -> bool {
        match self.try_accept(user_id, requester_id).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("[FRIENDS] Accept {} <- {} failed: {:#}", user_id, requester_id, e);
                false
            }
        }
    }

    async fn try_accept(&self, user_id: &str, requester_id: &str) -> anyhow::Result<bool> {
        let incoming = self.get_record(user_id, requester_id).await?;
        let outgoing = self.get_record(requester_id, user_id).await?;
        match (&incoming, &outgoing) {
            (Some(incoming), Some(outgoing))
                if incoming.status == FriendStatus::Pending
                    && !incoming.is_requester
                    && outgoing.status == FriendStatus::Pending
                    && outgoing.is_requester => {}
            _ => {
                warn!("[FRIENDS] No pending request from {} to {}", requester_id, user_id);
                return Ok(false);
            }
        }

        let accepted = vec![("status".to_string(), FieldUpdate::set(FriendStatus::Accepted.as_str()))];
        let mut batch = self.store.batch();
        batch.update(&paths::friend(user_id, requester_id), accepted.clone());
        batch.update(&paths::friend(requester_id, user_id), accepted);
        if let Some(accepter) = self.users.get_user_data(user_id).await {
            let notification = AppNotification::new(
                NotificationType::FriendAccepted,
                Some(&accepter),
                format!("{} accepted your friend request", accepter.username),
            );
            stage_notification(&mut batch, requester_id, &notification)?;
        }
        batch.commit().await?;

        info!("[FRIENDS] {} accepted {}", user_id, requester_id);
        Ok(true)
    }

    /// `user_id` declines a pending request from `requester_id`; both records go.
    pub async fn reject_friend_request(&self, user_id: &str, requester_id: &str) -> bool {
        match self.get_record(user_id, requester_id).await {
            Ok(Some(record)) if record.status == FriendStatus::Pending && !record.is_requester => {
                self.delete_edge(user_id, requester_id, "rejected").await
            }
            Ok(_) => {
                warn!("[FRIENDS] No pending request from {} to {}", requester_id, user_id);
                false
            }
            Err(e) => {
                error!("[FRIENDS] Reject {} <- {} failed: {:#}", user_id, requester_id, e);
                false
            }
        }
    }

    /// Remove an accepted friendship, or withdraw an outgoing request.
    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) -> bool {
        match self.get_record(user_id, friend_id).await {
            Ok(Some(_)) => self.delete_edge(user_id, friend_id, "removed").await,
            Ok(None) => {
                warn!("[FRIENDS] {} has no relationship with {}", user_id, friend_id);
                false
            }
            Err(e) => {
                error!("[FRIENDS] Remove {} / {} failed: {:#}", user_id, friend_id, e);
                false
            }
        }
    }

    async fn delete_edge(&self, a: &str, b: &str, action: &str) -> bool {
        let mut batch = self.store.batch();
        batch.delete(&paths::friend(a, b));
        batch.delete(&paths::friend(b, a));
        match batch.commit().await {
            Ok(()) => {
                info!("[FRIENDS] Relationship {} / {} {}", a, b, action);
                true
            }
            Err(e) => {
                error!("[FRIENDS] Failed to delete relationship {} / {}: {}", a, b, e);
                false
            }
        }
    }

    async fn records_with_status(&self, uid: &str, status: FriendStatus) -> Vec<Friend> {
        let query = Query::collection(&paths::friends(uid)).where_eq("status", status.as_str());
        match self.store.query(&query).await {
            Ok(docs) => docs
                .iter()
                .filter_map(|doc| match from_document::<Friend>(&doc.data) {
                    Ok(friend) => Some(friend),
                    Err(e) => {
                        warn!("[FRIENDS] Skipping corrupt record {}: {}", doc.path(), e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("[FRIENDS] Failed to read friends of {}: {}", uid, e);
                Vec::new()
            }
        }
    }

    /// Accepted friends with live statistics, most focus hours first.
    pub async fn get_friends(&self, uid: &str) -> Vec<Friend> {
        let mut friends = Vec::new();
        for cached in self.records_with_status(uid, FriendStatus::Accepted).await {
            let friend = match self.users.get_user_data(&cached.user_id).await {
                Some(live) => cached.overlay(&live),
                None => cached,
            };
            friends.push(friend);
        }
        friends.sort_by(|a, b| b.stats.focus_hours.total_cmp(&a.stats.focus_hours));
        friends
    }

    /// Requests other users sent to `uid`, newest first.
    pub async fn get_pending_requests(&self, uid: &str) -> Vec<Friend> {
        self.pending(uid, false).await
    }

    /// Requests `uid` sent that are still unanswered, newest first.
    pub async fn get_outgoing_requests(&self, uid: &str) -> Vec<Friend> {
        self.pending(uid, true).await
    }

    async fn pending(&self, uid: &str, is_requester: bool) -> Vec<Friend> {
        let mut requests: Vec<Friend> = self
            .records_with_status(uid, FriendStatus::Pending)
            .await
            .into_iter()
            .filter(|f| f.is_requester == is_requester)
            .collect();
        requests.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        requests
    }

    pub async fn get_friendship_status(&self, uid: &str, other: &str) -> FriendshipStatus {
        match self.get_record(uid, other).await {
            Ok(Some(f)) if f.status == FriendStatus::Accepted => FriendshipStatus::Friends,
            Ok(Some(f)) if f.is_requester => FriendshipStatus::PendingOutgoing,
            Ok(Some(_)) => FriendshipStatus::PendingIncoming,
            Ok(None) => FriendshipStatus::None,
            Err(e) => {
                warn!("[FRIENDS] Status lookup {} / {} failed: {}", uid, other, e);
                FriendshipStatus::None
            }
        }
    }

    /// Push the latest statistics of `user` into the snapshot every friend holds.
    ///
    /// Walks every user record to find the ones pointing back at `user`, so the
    /// cost grows with the total number of users.
    pub async fn update_friend_stats(&self, user: &UserData) -> bool {
        match self.try_update_friend_stats(user).await {
            Ok(updated) => {
                info!("[FRIENDS] Refreshed {} snapshot(s) of {}", updated, user.user_id);
                true
            }
            Err(e) => {
                error!("[FRIENDS] Stats fan-out for {} failed: {:#}", user.user_id, e);
                false
            }
        }
    }

    async fn try_update_friend_stats(&self, user: &UserData) -> anyhow::Result<usize> {
        let stats = user.stats();
        let updates = vec![
            ("fullName".to_string(), FieldUpdate::set(user.full_name.clone())),
            ("username".to_string(), FieldUpdate::set(user.username.clone())),
            ("avatarUrl".to_string(), FieldUpdate::Set(serde_json::to_value(&user.avatar_url)?)),
            ("focusHours".to_string(), FieldUpdate::set(stats.focus_hours)),
            ("focusHoursThisMonth".to_string(), FieldUpdate::set(stats.focus_hours_this_month)),
            ("dayStreak".to_string(), FieldUpdate::set(stats.day_streak)),
            ("rank".to_string(), FieldUpdate::Set(serde_json::to_value(stats.rank)?)),
        ];

        let mut batch = self.store.batch();
        for owner in self.store.list(paths::USERS).await? {
            if owner.id == user.user_id {
                continue;
            }
            let path = paths::friend(&owner.id, &user.user_id);
            if self.store.exists(&path).await? {
                batch.update(&path, updates.clone());
            }
        }
        let count = batch.len();
        batch.commit().await?;
        Ok(count)
    }

    /// Nudge an accepted friend to get back to work.
    pub async fn send_nudge(&self, from_id: &str, to_id: &str) -> bool {
        if self.get_friendship_status(from_id, to_id).await != FriendshipStatus::Friends {
            warn!("[FRIENDS] {} cannot nudge non-friend {}", from_id, to_id);
            return false;
        }
        let Some(sender) = self.users.get_user_data(from_id).await else {
            return false;
        };
        let notification = AppNotification::new(
            NotificationType::Nudge,
            Some(&sender),
            format!("{} nudged you to focus", sender.username),
        );
        let mut batch = self.store.batch();
        if let Err(e) = stage_notification(&mut batch, to_id, &notification) {
            error!("[FRIENDS] Could not encode nudge: {}", e);
            return false;
        }
        match batch.commit().await {
            Ok(()) => true,
            Err(e) => {
                error!("[FRIENDS] Nudge {} -> {} failed: {}", from_id, to_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::connection_quality::ConnectionQualityMonitor;

    async fn setup() -> (Arc<DocumentStore>, UserService, FriendService) {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let users = UserService::new(store.clone(), ConnectionQualityMonitor::new());
        for (uid, name) in [("a", "ann"), ("b", "bob"), ("c", "cy")] {
            users.create_user(uid, &format!("{}@example.com", name), name, name).await.unwrap();
        }
        let friends = FriendService::new(store.clone(), users.clone());
        (store, users, friends)
    }

    #[tokio::test]
    async fn request_writes_complementary_pending_records() {
        let (store, _, friends) = setup().await;
        assert!(friends.send_friend_request("a", "b").await);

        let a_side: Friend = store.get("users/a/friends/b").await.unwrap().unwrap().decode().unwrap();
        let b_side: Friend = store.get("users/b/friends/a").await.unwrap().unwrap().decode().unwrap();
        assert_eq!(a_side.status, FriendStatus::Pending);
        assert_eq!(b_side.status, FriendStatus::Pending);
        assert!(a_side.is_requester);
        assert!(!b_side.is_requester);
        assert_eq!(a_side.added_at, b_side.added_at);
        assert_eq!(a_side.username, "bob");

        assert_eq!(friends.get_pending_requests("b").await.len(), 1);
        assert_eq!(friends.get_outgoing_requests("a").await.len(), 1);
        assert_eq!(friends.get_friendship_status("b", "a").await, FriendshipStatus::PendingIncoming);
    }

    #[tokio::test]
    async fn self_and_duplicate_requests_fail() {
        let (store, _, friends) = setup().await;
        assert!(!friends.send_friend_request("a", "a").await);
        assert!(store.list("users/a/friends").await.unwrap().is_empty());

        assert!(friends.send_friend_request("a", "b").await);
        assert!(!friends.send_friend_request("a", "b").await);
        assert!(!friends.send_friend_request("b", "a").await);
        assert!(!friends.send_friend_request("a", "nobody").await);
        assert_eq!(store.list("users/a/friends").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_recipient_can_accept() {
        let (_, _, friends) = setup().await;
        assert!(!friends.accept_friend_request("b", "a").await);

        friends.send_friend_request("a", "b").await;
        assert!(!friends.accept_friend_request("a", "b").await);
        assert!(friends.accept_friend_request("b", "a").await);
        assert!(!friends.accept_friend_request("b", "a").await);
        assert_eq!(friends.get_friendship_status("a", "b").await, FriendshipStatus::Friends);
    }

    #[tokio::test]
    async fn reject_and_remove_delete_both_sides() {
        let (store, _, friends) = setup().await;
        friends.send_friend_request("a", "b").await;
        assert!(friends.reject_friend_request("b", "a").await);
        assert!(store.get("users/a/friends/b").await.unwrap().is_none());
        assert!(store.get("users/b/friends/a").await.unwrap().is_none());

        friends.send_friend_request("a", "c").await;
        friends.accept_friend_request("c", "a").await;
        assert!(friends.remove_friend("a", "c").await);
        assert!(store.list("users/c/friends").await.unwrap().is_empty());
        assert!(!friends.remove_friend("a", "c").await);
    }

    #[tokio::test]
    async fn friends_are_overlaid_with_live_stats_and_sorted() {
        let (_, users, friends) = setup().await;
        for peer in ["b", "c"] {
            friends.send_friend_request("a", peer).await;
            friends.accept_friend_request(peer, "a").await;
        }
        let mut bob = users.get_user_data("b").await.unwrap();
        bob.focus_hours = 3.0;
        users.save_user_data(&bob).await.unwrap();
        let mut cy = users.get_user_data("c").await.unwrap();
        cy.focus_hours = 8.0;
        users.save_user_data(&cy).await.unwrap();

        let list = friends.get_friends("a").await;
        let order: Vec<&str> = list.iter().map(|f| f.user_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b"]);
        assert_eq!(list[0].stats.focus_hours, 8.0);
    }

    #[tokio::test]
    async fn stats_fan_out_updates_cached_snapshots() {
        let (store, users, friends) = setup().await;
        friends.send_friend_request("a", "b").await;
        friends.accept_friend_request("b", "a").await;

        let ann = users.get_user_data("a").await.unwrap().with_stats(42.0, 5.0, 4);
        assert!(friends.update_friend_stats(&ann).await);

        let cached: Friend = store.get("users/b/friends/a").await.unwrap().unwrap().decode().unwrap();
        assert_eq!(cached.stats.focus_hours, 42.0);
        assert_eq!(cached.stats.day_streak, 4);
        assert_eq!(cached.status, FriendStatus::Accepted);
    }

    #[tokio::test]
    async fn nudges_need_an_accepted_friendship() {
        let (store, _, friends) = setup().await;
        assert!(!friends.send_nudge("a", "b").await);
        friends.send_friend_request("a", "b").await;
        friends.accept_friend_request("b", "a").await;
        assert!(friends.send_nudge("a", "b").await);
        // friend request + nudge
        assert_eq!(store.list("users/b/notifications").await.unwrap().len(), 2);
    }
}
