use std::sync::Arc;

use anyhow::Context;
use futures_util::{Stream, StreamExt};
use log::{error, info, warn};

use crate::cache::UserCache;
use crate::common::models::{from_document, to_document, FocusSession, UserData, UserProfile};
use crate::store::{paths, ChangeKind, DocumentStore, FieldUpdate};
use crate::utils::connection_quality::ConnectionQualityMonitor;

const SEARCH_LIMIT: usize = 20;

/// Fields a user may edit on their profile. `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

impl ProfileUpdate {
    fn into_updates(self) -> Vec<(String, FieldUpdate)> {
        let mut updates = Vec::new();
        if let Some(v) = self.full_name {
            updates.push(("fullName".to_string(), FieldUpdate::set(v)));
        }
        if let Some(v) = self.username {
            updates.push(("username".to_string(), FieldUpdate::set(v)));
        }
        if let Some(v) = self.bio {
            updates.push(("bio".to_string(), FieldUpdate::set(v)));
        }
        if let Some(v) = self.avatar_url {
            updates.push(("avatarUrl".to_string(), FieldUpdate::set(v)));
        }
        if let Some(v) = self.banner_url {
            updates.push(("bannerUrl".to_string(), FieldUpdate::set(v)));
        }
        updates
    }
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<DocumentStore>,
    quality: ConnectionQualityMonitor,
    cache: Option<Arc<dyn UserCache>>,
}

impl UserService {
    pub fn new(store: Arc<DocumentStore>, quality: ConnectionQualityMonitor) -> Self {
        Self { store, quality, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn UserCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Create the record for a freshly registered account. Failures propagate.
    pub async fn create_user(&self, uid: &str, email: &str, full_name: &str, username: &str) -> anyhow::Result<UserData> {
        let user = UserData::new(uid, email, full_name, username);
        self.store
            .set(&paths::user(uid), to_document(&user)?)
            .await
            .with_context(|| format!("creating user record for {}", uid))?;
        info!("[USERS] Created user {} ({})", uid, username);
        Ok(user)
    }

    /// Propagates failures: the profile screen reports them.
    pub async fn save_user_data(&self, user: &UserData) -> anyhow::Result<()> {
        self.store
            .set(&paths::user(&user.user_id), to_document(user)?)
            .await
            .with_context(|| format!("saving user {}", user.user_id))?;
        self.invalidate_cached(&user.user_id).await;
        Ok(())
    }

    pub async fn get_user_data(&self, uid: &str) -> Option<UserData> {
        if let Some(cache) = &self.cache {
            match cache.get_user(uid).await {
                Ok(Some(user)) => return Some(user),
                Ok(None) => {}
                Err(e) => warn!("[USERS] Cache read failed for {}: {}", uid, e),
            }
        }

        let user = self.fetch_from_store(uid).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put_user(&user, self.quality.policy().cache_ttl).await {
                warn!("[USERS] Cache write failed for {}: {}", uid, e);
            }
        }
        Some(user)
    }

    /// Reads the stored record, bypassing the cache. Used before whole-record writes.
    async fn fetch_from_store(&self, uid: &str) -> Option<UserData> {
        let path = paths::user(uid);
        match self.quality.measure(self.store.get(&path)).await {
            Ok(Some(doc)) => match doc.decode::<UserData>() {
                Ok(user) => Some(user),
                Err(e) => {
                    error!("[USERS] {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[USERS] Failed to fetch user {}: {}", uid, e);
                None
            }
        }
    }

    pub async fn get_user_profile(&self, uid: &str) -> Option<UserProfile> {
        self.get_user_data(uid).await.map(|u| UserProfile::from(&u))
    }

    /// Propagates failures, like [`UserService::save_user_data`].
    pub async fn update_profile(&self, uid: &str, update: ProfileUpdate) -> anyhow::Result<()> {
        let updates = update.into_updates();
        if updates.is_empty() {
            return Ok(());
        }
        self.store
            .update(&paths::user(uid), updates)
            .await
            .with_context(|| format!("updating profile of {}", uid))?;
        self.invalidate_cached(uid).await;
        info!("[USERS] Updated profile of {}", uid);
        Ok(())
    }

    /// Fold a finished session into the user's statistics and persist them.
    pub async fn record_focus_session(&self, uid: &str, session: FocusSession) -> Option<UserData> {
        let user = self.fetch_from_store(uid).await?;
        let updated = user.apply_session(session);
        match self.save_user_data(&updated).await {
            Ok(()) => {
                info!(
                    "[USERS] {} now at {:.2}h ({:.2}h this month, streak {})",
                    uid, updated.focus_hours, updated.focus_hours_this_month, updated.day_streak
                );
                Some(updated)
            }
            Err(e) => {
                error!("[USERS] Failed to record session for {}: {:#}", uid, e);
                None
            }
        }
    }

    pub async fn reset_monthly_hours(&self, uid: &str) -> bool {
        let result = self
            .store
            .update(&paths::user(uid), vec![("focusHoursThisMonth".to_string(), FieldUpdate::set(0.0))])
            .await;
        match result {
            Ok(()) => {
                self.invalidate_cached(uid).await;
                true
            }
            Err(e) => {
                warn!("[USERS] Failed to reset monthly hours for {}: {}", uid, e);
                false
            }
        }
    }

    /// Case-insensitive username prefix search.
    pub async fn search_users(&self, prefix: &str, exclude_uid: Option<&str>) -> Vec<UserProfile> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }
        let docs = match self.store.list(paths::USERS).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("[USERS] Search failed: {}", e);
                return Vec::new();
            }
        };
        let mut found: Vec<UserProfile> = docs
            .iter()
            .filter_map(|doc| from_document::<UserData>(&doc.data).ok())
            .filter(|u| Some(u.user_id.as_str()) != exclude_uid)
            .filter(|u| u.username.to_lowercase().starts_with(&prefix))
            .map(|u| UserProfile::from(&u))
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        found.truncate(SEARCH_LIMIT);
        found
    }

    /// Live updates of one user record; yields `None` when it is deleted.
    pub fn watch_user(&self, uid: &str) -> impl Stream<Item = Option<UserData>> + Send + 'static {
        let uid = uid.to_string();
        self.store.watch(paths::USERS).filter_map(move |change| {
            let matches = change.doc_id == uid;
            async move {
                if !matches {
                    return None;
                }
                match (change.kind, change.data) {
                    (ChangeKind::Written, Some(data)) => Some(from_document::<UserData>(&data).ok()),
                    _ => Some(None),
                }
            }
        })
    }

    /// Drop the cached record after another service wrote to `users/{uid}`.
    pub(crate) async fn invalidate_cached(&self, uid: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_user(uid).await {
                warn!("[USERS] Cache invalidation failed for {}: {}", uid, e);
            }
        }
    }
}
