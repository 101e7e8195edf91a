use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use rand::Rng;
use serde_json::Value;

use crate::common::models::{
    from_document, to_document, AppNotification, Group, GroupMember, NotificationType, UserData,
};
use crate::services::notification_service::stage_notification;
use crate::services::user_service::UserService;
use crate::store::{paths, DocumentStore, FieldUpdate, Query, MAX_IN_FILTER_IDS};
use crate::utils::connection_quality::ConnectionQualityMonitor;

pub const INVITE_CODE_LENGTH: usize = 6;
pub const INVITE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random invite code. Collisions are not checked.
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LENGTH)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn stats_updates(user: &UserData) -> anyhow::Result<Vec<(String, FieldUpdate)>> {
    let stats = user.stats();
    Ok(vec![
        ("fullName".to_string(), FieldUpdate::set(user.full_name.clone())),
        ("username".to_string(), FieldUpdate::set(user.username.clone())),
        ("avatarUrl".to_string(), FieldUpdate::Set(serde_json::to_value(&user.avatar_url)?)),
        ("focusHours".to_string(), FieldUpdate::set(stats.focus_hours)),
        ("focusHoursThisMonth".to_string(), FieldUpdate::set(stats.focus_hours_this_month)),
        ("dayStreak".to_string(), FieldUpdate::set(stats.day_streak)),
        ("rank".to_string(), FieldUpdate::Set(serde_json::to_value(stats.rank)?)),
    ])
}

#[derive(Clone)]
pub struct GroupService {
    store: Arc<DocumentStore>,
    users: UserService,
    quality: ConnectionQualityMonitor,
}

impl GroupService {
    pub fn new(store: Arc<DocumentStore>, users: UserService, quality: ConnectionQualityMonitor) -> Self {
        Self { store, users, quality }
    }

    pub async fn create_group(&self, creator_id: &str, name: &str, description: Option<&str>) -> Option<Group> {
        let name = name.trim();
        if name.is_empty() {
            warn!("[GROUPS] Refusing to create a group without a name");
            return None;
        }
        match self.try_create(creator_id, name, description).await {
            Ok(group) => group,
            Err(e) => {
                error!("[GROUPS] Create '{}' by {} failed: {:#}", name, creator_id, e);
                None
            }
        }
    }

    async fn try_create(&self, creator_id: &str, name: &str, description: Option<&str>) -> anyhow::Result<Option<Group>> {
        let Some(creator) = self.users.get_user_data(creator_id).await else {
            warn!("[GROUPS] Unknown creator {}", creator_id);
            return Ok(None);
        };
        let now = Utc::now();
        let group = Group {
            group_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            invite_code: generate_invite_code(),
            creator_id: creator_id.to_string(),
            member_ids: vec![creator_id.to_string()],
            member_count: 1,
            created_at: now,
        };

        let mut batch = self.store.batch();
        batch.set(&paths::group(&group.group_id), to_document(&group)?);
        batch.set(
            &paths::member(&group.group_id, creator_id),
            to_document(&GroupMember::from_user(&creator, now))?,
        );
        batch.update(
            &paths::user(creator_id),
            vec![("groupIds".to_string(), FieldUpdate::ArrayUnion(vec![Value::from(group.group_id.clone())]))],
        );
        batch.commit().await?;
        self.users.invalidate_cached(creator_id).await;

        info!("[GROUPS] Group '{}' created with id {} (code {})", name, group.group_id, group.invite_code);
        Ok(Some(group))
    }

    pub async fn get_group(&self, group_id: &str) -> Option<Group> {
        match self.store.get(&paths::group(group_id)).await {
            Ok(Some(doc)) => doc.decode().map_err(|e| warn!("[GROUPS] {}", e)).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("[GROUPS] Failed to fetch group {}: {}", group_id, e);
                None
            }
        }
    }

    pub async fn find_by_invite_code(&self, code: &str) -> Option<Group> {
        let query = Query::collection(paths::GROUPS)
            .where_eq("inviteCode", normalize_code(code))
            .limit(1);
        match self.store.query(&query).await {
            Ok(docs) => docs.first().and_then(|doc| from_document(&doc.data).ok()),
            Err(e) => {
                warn!("[GROUPS] Invite code lookup failed: {}", e);
                None
            }
        }
    }

    /// Join the group whose invite code matches `code`, ignoring case.
    pub async fn join_group(&self, user_id: &str, code: &str) -> Option<Group> {
        let Some(group) = self.find_by_invite_code(code).await else {
            warn!("[GROUPS] No group with code {}", normalize_code(code));
            return None;
        };
        if group.is_member(user_id) {
            warn!("[GROUPS] {} is already a member of {}", user_id, group.group_id);
            return None;
        }
        match self.try_join(user_id, group).await {
            Ok(group) => group,
            Err(e) => {
                error!("[GROUPS] {} failed to join: {:#}", user_id, e);
                None
            }
        }
    }

    async fn try_join(&self, user_id: &str, mut group: Group) -> anyhow::Result<Option<Group>> {
        let Some(user) = self.users.get_user_data(user_id).await else {
            warn!("[GROUPS] Unknown user {}", user_id);
            return Ok(None);
        };
        let member_id = Value::from(user_id.to_string());
        let group_id = Value::from(group.group_id.clone());

        let mut batch = self.store.batch();
        batch.set(
            &paths::member(&group.group_id, user_id),
            to_document(&GroupMember::from_user(&user, Utc::now()))?,
        );
        batch.update(
            &paths::group(&group.group_id),
            vec![
                ("memberCount".to_string(), FieldUpdate::Increment(1.0)),
                ("memberIds".to_string(), FieldUpdate::ArrayUnion(vec![member_id])),
            ],
        );
        batch.update(
            &paths::user(user_id),
            vec![("groupIds".to_string(), FieldUpdate::ArrayUnion(vec![group_id]))],
        );
        let notice = AppNotification::new(
            NotificationType::GroupJoined,
            Some(&user),
            format!("{} joined {}", user.username, group.name),
        );
        stage_notification(&mut batch, &group.creator_id, &notice)?;
        batch.commit().await?;
        self.users.invalidate_cached(user_id).await;

        group.member_ids.push(user_id.to_string());
        group.member_count += 1;
        info!("[GROUPS] {} joined {} ({} members)", user_id, group.group_id, group.member_count);
        Ok(Some(group))
    }

    /// Leave a group. The last member leaving deletes it, whoever created it.
    pub async fn leave_group(&self, user_id: &str, group_id: &str) -> bool {
        let Some(group) = self.get_group(group_id).await else {
            warn!("[GROUPS] Group {} not found", group_id);
            return false;
        };
        if !group.is_member(user_id) {
            warn!("[GROUPS] {} is not a member of {}", user_id, group_id);
            return false;
        }
        if group.member_count <= 1 {
            return self.delete_cascade(&group).await;
        }

        let mut batch = self.store.batch();
        batch.delete(&paths::member(group_id, user_id));
        batch.update(
            &paths::group(group_id),
            vec![
                ("memberCount".to_string(), FieldUpdate::Increment(-1.0)),
                ("memberIds".to_string(), FieldUpdate::ArrayRemove(vec![Value::from(user_id.to_string())])),
            ],
        );
        batch.update(
            &paths::user(user_id),
            vec![("groupIds".to_string(), FieldUpdate::ArrayRemove(vec![Value::from(group_id.to_string())]))],
        );
        match batch.commit().await {
            Ok(()) => {
                self.users.invalidate_cached(user_id).await;
                info!("[GROUPS] {} left {}", user_id, group_id);
                true
            }
            Err(e) => {
                error!("[GROUPS] {} failed to leave {}: {}", user_id, group_id, e);
                false
            }
        }
    }

    /// Only the creator may delete a group.
    pub async fn delete_group(&self, requester_id: &str, group_id: &str) -> bool {
        match self.get_group(group_id).await {
            Some(group) if group.creator_id == requester_id => self.delete_cascade(&group).await,
            Some(_) => {
                warn!("[GROUPS] {} is not the creator of {}", requester_id, group_id);
                false
            }
            None => false,
        }
    }

    async fn delete_cascade(&self, group: &Group) -> bool {
        match self.try_delete_cascade(group).await {
            Ok(()) => {
                info!("[GROUPS] Group {} deleted", group.group_id);
                true
            }
            Err(e) => {
                error!("[GROUPS] Failed to delete group {}: {:#}", group.group_id, e);
                false
            }
        }
    }

    async fn try_delete_cascade(&self, group: &Group) -> anyhow::Result<()> {
        let members = self.store.list(&paths::members(&group.group_id)).await?;
        let group_ref = Value::from(group.group_id.clone());
        let mut batch = self.store.batch();
        let mut touched = Vec::new();
        for member in &members {
            batch.delete(&member.path());
            if self.store.exists(&paths::user(&member.id)).await? {
                touched.push(member.id.clone());
                batch.update(
                    &paths::user(&member.id),
                    vec![("groupIds".to_string(), FieldUpdate::ArrayRemove(vec![group_ref.clone()]))],
                );
            }
        }
        batch.delete(&paths::group(&group.group_id));
        batch.commit().await?;
        for uid in &touched {
            self.users.invalidate_cached(uid).await;
        }
        Ok(())
    }

    pub async fn get_user_groups(&self, user_id: &str) -> Vec<Group> {
        let Some(user) = self.users.get_user_data(user_id).await else {
            return Vec::new();
        };
        let mut groups = Vec::new();
        for chunk in user.group_ids.chunks(MAX_IN_FILTER_IDS) {
            let query = Query::collection(paths::GROUPS).id_in(chunk.iter().cloned());
            match self.store.query(&query).await {
                Ok(docs) => groups.extend(docs.iter().filter_map(|d| from_document::<Group>(&d.data).ok())),
                Err(e) => warn!("[GROUPS] Failed to fetch groups of {}: {}", user_id, e),
            }
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Member roster with live statistics, most focus hours first.
    ///
    /// Users are fetched with document-id `in` queries, at most ten ids per query
    /// and fewer when the connection is poor.
    pub async fn get_group_members(&self, group_id: &str) -> Vec<GroupMember> {
        let members: Vec<GroupMember> = match self.store.list(&paths::members(group_id)).await {
            Ok(docs) => docs.iter().filter_map(|d| from_document(&d.data).ok()).collect(),
            Err(e) => {
                warn!("[GROUPS] Failed to list members of {}: {}", group_id, e);
                return Vec::new();
            }
        };

        let ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
        let chunk_size = self.quality.policy().batch_size.clamp(1, MAX_IN_FILTER_IDS);
        let mut live: HashMap<String, UserData> = HashMap::new();
        for chunk in ids.chunks(chunk_size) {
            let query = Query::collection(paths::USERS).id_in(chunk.iter().cloned());
            match self.quality.measure(self.store.query(&query)).await {
                Ok(docs) => {
                    for doc in docs {
                        if let Ok(user) = doc.decode::<UserData>() {
                            live.insert(user.user_id.clone(), user);
                        }
                    }
                }
                Err(e) => warn!("[GROUPS] Live stats unavailable for a batch of {}: {}", chunk.len(), e),
            }
        }

        let mut roster: Vec<GroupMember> = members
            .iter()
            .map(|m| match live.get(&m.user_id) {
                Some(user) => m.overlay(user),
                None => m.clone(),
            })
            .collect();
        roster.sort_by(|a, b| b.stats.focus_hours.total_cmp(&a.stats.focus_hours));
        roster
    }

    /// Refresh the caller's cached snapshot in every group they belong to.
    pub async fn update_group_member_stats(&self, user: &UserData) -> bool {
        let updates = match stats_updates(user) {
            Ok(updates) => updates,
            Err(e) => {
                error!("[GROUPS] {}", e);
                return false;
            }
        };
        let mut batch = self.store.batch();
        for group_id in &user.group_ids {
            let path = paths::member(group_id, &user.user_id);
            match self.store.exists(&path).await {
                Ok(true) => {
                    batch.update(&path, updates.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("[GROUPS] Member lookup {} failed: {}", path, e);
                    return false;
                }
            }
        }
        match batch.commit().await {
            Ok(()) => true,
            Err(e) => {
                error!("[GROUPS] Member stats refresh for {} failed: {}", user.user_id, e);
                false
            }
        }
    }
}
