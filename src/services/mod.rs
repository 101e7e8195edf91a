pub mod achievement_service;
pub mod friend_service;
pub mod group_service;
pub mod media_service;
pub mod notification_service;
pub mod project_service;
pub mod user_service;

use std::sync::Arc;

use log::{info, warn};

use crate::cache::{StatsCache, UserCache};
use crate::common::models::{Achievement, FocusSession, UserData};
use crate::config::AppConfig;
use crate::storage::ObjectStorage;
use crate::store::DocumentStore;
use crate::utils::connection_quality::ConnectionQualityMonitor;
use crate::utils::image_cache::ImageCache;
use crate::utils::task_pool::TaskPool;

use achievement_service::AchievementService;
use friend_service::FriendService;
use group_service::GroupService;
use media_service::ImageUploader;
use notification_service::NotificationService;
use project_service::ProjectService;
use user_service::UserService;

const IMAGE_CACHE_ENTRIES: usize = 64;

/// What a finished focus session changed.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub user: UserData,
    pub unlocked: Vec<Achievement>,
}

/// Every service wired to one store and one connection-quality monitor.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<DocumentStore>,
    pub quality: ConnectionQualityMonitor,
    pub users: UserService,
    pub friends: FriendService,
    pub groups: GroupService,
    pub notifications: NotificationService,
    pub projects: ProjectService,
    pub achievements: AchievementService,
    pub images: ImageUploader,
}

impl Services {
    pub fn new(store: Arc<DocumentStore>, quality: ConnectionQualityMonitor, storage: ObjectStorage, pool: Arc<TaskPool>) -> Self {
        Self::assemble(store, quality, storage, pool, None)
    }

    /// Connect the store, run migrations and attach the Redis stats cache when configured.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(DocumentStore::connect(&config.database_url).await?);
        store.migrate().await?;

        let cache: Option<Arc<dyn UserCache>> = match &config.redis_url {
            Some(url) => match StatsCache::new(url).await {
                Ok(cache) => match cache.health_check().await {
                    Ok(true) => Some(Arc::new(cache)),
                    Ok(false) | Err(_) => {
                        warn!("[CACHE] Redis did not answer PING, continuing without stats cache");
                        None
                    }
                },
                Err(e) => {
                    warn!("[CACHE] Redis unavailable, continuing without stats cache: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self::assemble(
            store,
            ConnectionQualityMonitor::new(),
            ObjectStorage::new(&config.storage_root),
            Arc::new(TaskPool::new(config.worker_count)),
            cache,
        ))
    }

    fn assemble(
        store: Arc<DocumentStore>,
        quality: ConnectionQualityMonitor,
        storage: ObjectStorage,
        pool: Arc<TaskPool>,
        cache: Option<Arc<dyn UserCache>>,
    ) -> Self {
        let mut users = UserService::new(store.clone(), quality.clone());
        if let Some(cache) = cache {
            users = users.with_cache(cache);
        }
        let images = ImageUploader::new(
            storage,
            users.clone(),
            pool,
            ImageCache::new(IMAGE_CACHE_ENTRIES, quality.clone()),
        );
        Self {
            friends: FriendService::new(store.clone(), users.clone()),
            groups: GroupService::new(store.clone(), users.clone(), quality.clone()),
            notifications: NotificationService::new(store.clone()),
            projects: ProjectService::new(store.clone()),
            achievements: AchievementService::new(store.clone()),
            images,
            users,
            quality,
            store,
        }
    }

    /// Record a finished session and propagate it: project minutes, achievements
    /// and the cached stats other users see. Only the user write is required to succeed.
    pub async fn complete_focus_session(&self, uid: &str, session: FocusSession) -> Option<SessionOutcome> {
        let project_id = session.project_id.clone();
        let minutes = session.duration;
        let user = self.users.record_focus_session(uid, session).await?;

        self.projects.add_focus_minutes(uid, project_id.as_deref(), None, minutes).await;
        let unlocked = self.achievements.check_and_unlock_achievements(uid, &user).await;
        if !self.friends.update_friend_stats(&user).await {
            warn!("[USERS] Friend snapshots of {} are stale", uid);
        }
        if !self.groups.update_group_member_stats(&user).await {
            warn!("[USERS] Group snapshots of {} are stale", uid);
        }

        info!("[USERS] Session of {} minutes completed by {}", minutes, uid);
        Some(SessionOutcome { user, unlocked })
    }
}
