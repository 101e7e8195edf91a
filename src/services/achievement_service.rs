use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::common::models::{
    from_document, to_document, Achievement, AchievementCriteria, AppNotification, NotificationType, UserData,
};
use crate::services::notification_service::stage_notification;
use crate::store::{paths, DocumentStore};

/// Every user starts with this list, all locked.
pub fn catalog() -> Vec<Achievement> {
    use AchievementCriteria::*;
    vec![
        Achievement::new("first_hour", "First Hour", "Focus for one hour in total", FocusHours, 1.0),
        Achievement::new("focus_10", "Getting Serious", "Focus for 10 hours in total", FocusHours, 10.0),
        Achievement::new("focus_50", "Dedicated", "Focus for 50 hours in total", FocusHours, 50.0),
        Achievement::new("focus_100", "Centurion", "Focus for 100 hours in total", FocusHours, 100.0),
        Achievement::new("streak_3", "On a Roll", "Focus three days in a row", DayStreak, 3.0),
        Achievement::new("streak_7", "Week Warrior", "Focus seven days in a row", DayStreak, 7.0),
        Achievement::new("streak_30", "Unbreakable", "Focus thirty days in a row", DayStreak, 30.0),
        Achievement::new("sessions_10", "Habit Forming", "Complete 10 focus sessions", SessionCount, 10.0),
        Achievement::new("sessions_100", "Creature of Habit", "Complete 100 focus sessions", SessionCount, 100.0),
        Achievement::new("deep_dive", "Deep Dive", "Finish a single 60 minute session", LongestSession, 60.0),
        Achievement::new("marathon", "Marathon", "Finish a single 120 minute session", LongestSession, 120.0),
    ]
}

/// Whether `user` has reached `achievement`'s target.
pub fn criterion_met(achievement: &Achievement, user: &UserData) -> bool {
    let value = match achievement.criteria {
        AchievementCriteria::FocusHours => user.focus_hours,
        AchievementCriteria::DayStreak => f64::from(user.day_streak),
        AchievementCriteria::SessionCount => user.session_count() as f64,
        AchievementCriteria::LongestSession => f64::from(user.longest_session()),
    };
    value >= achievement.target_value
}

#[derive(Clone)]
pub struct AchievementService {
    store: Arc<DocumentStore>,
}

impl AchievementService {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// The user's achievements in catalog order. Missing entries are seeded on first read.
    pub async fn get_achievements(&self, uid: &str) -> Vec<Achievement> {
        match self.load_or_seed(uid).await {
            Ok(achievements) => achievements,
            Err(e) => {
                warn!("[ACHIEVEMENTS] Failed to load achievements of {}: {:#}", uid, e);
                Vec::new()
            }
        }
    }

    async fn load_or_seed(&self, uid: &str) -> anyhow::Result<Vec<Achievement>> {
        let stored: Vec<Achievement> = self
            .store
            .list(&paths::achievements(uid))
            .await?
            .iter()
            .filter_map(|doc| from_document(&doc.data).ok())
            .collect();

        let mut batch = self.store.batch();
        let mut achievements = Vec::new();
        for entry in catalog() {
            match stored.iter().find(|a| a.id == entry.id) {
                Some(existing) => achievements.push(existing.clone()),
                None => {
                    batch.set(&paths::achievement(uid, &entry.id), to_document(&entry)?);
                    achievements.push(entry);
                }
            }
        }
        if !batch.is_empty() {
            let seeded = batch.len();
            batch.commit().await?;
            info!("[ACHIEVEMENTS] Seeded {} achievements for {}", seeded, uid);
        }
        Ok(achievements)
    }

    /// Unlock every locked achievement `user` now satisfies, in one write.
    ///
    /// Returns only the newly unlocked entries; unlocked ones are left untouched.
    pub async fn check_and_unlock_achievements(&self, uid: &str, user: &UserData) -> Vec<Achievement> {
        match self.try_unlock(uid, user).await {
            Ok(unlocked) => unlocked,
            Err(e) => {
                error!("[ACHIEVEMENTS] Unlock check for {} failed: {:#}", uid, e);
                Vec::new()
            }
        }
    }

    async fn try_unlock(&self, uid: &str, user: &UserData) -> anyhow::Result<Vec<Achievement>> {
        let now = Utc::now();
        let unlocked: Vec<Achievement> = self
            .load_or_seed(uid)
            .await?
            .iter()
            .filter(|a| !a.is_unlocked && criterion_met(a, user))
            .map(|a| a.unlocked(now))
            .collect();
        if unlocked.is_empty() {
            return Ok(unlocked);
        }

        let mut batch = self.store.batch();
        for achievement in &unlocked {
            batch.set(&paths::achievement(uid, &achievement.id), to_document(achievement)?);
            let notice = AppNotification::new(
                NotificationType::AchievementUnlocked,
                None,
                format!("Achievement unlocked: {}", achievement.title),
            );
            stage_notification(&mut batch, uid, &notice)?;
        }
        batch.commit().await?;

        info!("[ACHIEVEMENTS] {} unlocked {} achievement(s)", uid, unlocked.len());
        Ok(unlocked)
    }

    pub async fn unlocked_count(&self, uid: &str) -> usize {
        self.get_achievements(uid).await.iter().filter(|a| a.is_unlocked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::FocusSession;
    use chrono::{Duration, TimeZone};

    fn user_with(hours: f64, streak: u32) -> UserData {
        UserData::new("u1", "u1@example.com", "U One", "u1").with_stats(hours, hours, streak)
    }

    #[test]
    fn catalog_ids_are_unique() {
        let ids: std::collections::HashSet<_> = catalog().into_iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn thresholds_are_inclusive() {
        let ten = Achievement::new("t", "T", "", AchievementCriteria::FocusHours, 10.0);
        assert!(!criterion_met(&ten, &user_with(9.0, 0)));
        assert!(criterion_met(&ten, &user_with(10.0, 0)));

        let deep = Achievement::new("d", "D", "", AchievementCriteria::LongestSession, 60.0);
        let mut user = user_with(0.0, 0);
        assert!(!criterion_met(&deep, &user));
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        user.focus_sessions.push(FocusSession::new(45, None, at));
        user.focus_sessions.push(FocusSession::new(60, None, at + Duration::hours(2)));
        assert!(criterion_met(&deep, &user));
    }

    #[tokio::test]
    async fn first_read_seeds_catalog() {
        let service = AchievementService::new(Arc::new(DocumentStore::in_memory().await.unwrap()));
        let achievements = service.get_achievements("u1").await;
        assert_eq!(achievements.len(), catalog().len());
        assert!(achievements.iter().all(|a| !a.is_unlocked));
        assert_eq!(service.unlocked_count("u1").await, 0);
    }

    #[tokio::test]
    async fn unlocks_once_and_keeps_timestamp() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let service = AchievementService::new(store.clone());

        let first = service.check_and_unlock_achievements("u1", &user_with(10.0, 3)).await;
        let ids: Vec<_> = first.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["first_hour", "focus_10", "streak_3"]);

        let stamp = service
            .get_achievements("u1")
            .await
            .into_iter()
            .find(|a| a.id == "focus_10")
            .and_then(|a| a.unlocked_at);
        assert!(stamp.is_some());

        assert!(service.check_and_unlock_achievements("u1", &user_with(10.0, 3)).await.is_empty());
        let again = service
            .get_achievements("u1")
            .await
            .into_iter()
            .find(|a| a.id == "focus_10")
            .and_then(|a| a.unlocked_at);
        assert_eq!(stamp, again);
        assert_eq!(service.unlocked_count("u1").await, 3);

        let notices = store.list(&paths::notifications("u1")).await.unwrap();
        assert_eq!(notices.len(), 3);
    }
}
