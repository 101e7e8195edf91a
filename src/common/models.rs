// Plain records stored in the document store. Field names are camelCase on the wire
// and timestamps are integer milliseconds.
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Encode a record into the JSON body written to the store.
pub fn to_document<T: Serialize>(record: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(record)?)
}

/// Decode a stored JSON body into a record.
pub fn from_document<T: DeserializeOwned>(data: &Value) -> anyhow::Result<T> {
    Ok(serde_json::from_value(data.clone())?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    #[default]
    Novice,
    Apprentice,
    Focused,
    Expert,
    Master,
    Legend,
}

impl Rank {
    pub fn for_hours(hours: f64) -> Self {
        match hours {
            h if h >= 500.0 => Rank::Legend,
            h if h >= 250.0 => Rank::Master,
            h if h >= 100.0 => Rank::Expert,
            h if h >= 50.0 => Rank::Focused,
            h if h >= 10.0 => Rank::Apprentice,
            _ => Rank::Novice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Minutes.
    pub duration: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
}

impl FocusSession {
    pub fn new(duration: u32, project_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            duration,
            started_at,
        }
    }
}

/// Cached copy of a user's statistics, embedded in friend and group member records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    #[serde(default)]
    pub focus_hours: f64,
    #[serde(default)]
    pub focus_hours_this_month: f64,
    #[serde(default)]
    pub day_streak: u32,
    #[serde(default)]
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub focus_hours: f64,
    #[serde(default)]
    pub focus_hours_this_month: f64,
    #[serde(default)]
    pub day_streak: u32,
    #[serde(default)]
    pub focus_sessions: Vec<FocusSession>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub rank: Rank,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl UserData {
    pub fn new(user_id: &str, email: &str, full_name: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            full_name: full_name.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            avatar_url: None,
            banner_url: None,
            bio: None,
            focus_hours: 0.0,
            focus_hours_this_month: 0.0,
            day_streak: 0,
            focus_sessions: Vec::new(),
            group_ids: Vec::new(),
            rank: Rank::Novice,
            created_at: Utc::now(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            focus_hours: self.focus_hours,
            focus_hours_this_month: self.focus_hours_this_month,
            day_streak: self.day_streak,
            rank: self.rank,
        }
    }

    /// Copy of this record with new cumulative statistics; rank is re-derived.
    pub fn with_stats(&self, focus_hours: f64, focus_hours_this_month: f64, day_streak: u32) -> Self {
        Self {
            focus_hours,
            focus_hours_this_month,
            day_streak,
            rank: Rank::for_hours(focus_hours),
            ..self.clone()
        }
    }

    pub fn session_count(&self) -> usize {
        self.focus_sessions.len()
    }

    /// Longest single session in minutes, 0 when there are none.
    pub fn longest_session(&self) -> u32 {
        self.focus_sessions.iter().map(|s| s.duration).max().unwrap_or(0)
    }

    fn last_session_day(&self) -> Option<NaiveDate> {
        self.focus_sessions.iter().map(|s| s.started_at.date_naive()).max()
    }

    /// Fold a completed session into the cumulative statistics.
    ///
    /// Monthly hours restart when the previous session fell in another month. The
    /// streak grows when the previous session was the day before, is kept on the
    /// same day and restarts at 1 otherwise.
    pub fn apply_session(&self, session: FocusSession) -> Self {
        let day = session.started_at.date_naive();
        let hours = f64::from(session.duration) / 60.0;

        let (month_base, streak) = match self.last_session_day() {
            Some(last) => {
                let same_month = last.year() == day.year() && last.month() == day.month();
                let month_base = if same_month { self.focus_hours_this_month } else { 0.0 };
                let streak = if last == day {
                    self.day_streak.max(1)
                } else if last.succ_opt() == Some(day) {
                    self.day_streak + 1
                } else {
                    1
                };
                (month_base, streak)
            }
            None => (0.0, 1),
        };

        let mut next = self.with_stats(self.focus_hours + hours, month_base + hours, streak);
        next.focus_sessions.push(session);
        next
    }
}

/// Public projection of a user shown on profile and search screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub bio: Option<String>,
    pub stats: StatsSnapshot,
    pub session_count: usize,
    pub group_count: usize,
}

impl From<&UserData> for UserProfile {
    fn from(user: &UserData) -> Self {
        Self {
            user_id: user.user_id.clone(),
            full_name: user.full_name.clone(),
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            banner_url: user.banner_url.clone(),
            bio: user.bio.clone(),
            stats: user.stats(),
            session_count: user.session_count(),
            group_count: user.group_ids.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

impl FriendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendStatus::Pending => "pending",
            FriendStatus::Accepted => "accepted",
        }
    }
}

/// One side of a friendship, stored under the owner's `friends` sub-collection and
/// keyed by the peer's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub status: FriendStatus,
    pub is_requester: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

impl Friend {
    /// Record describing `peer` as seen by its owner.
    pub fn from_peer(peer: &UserData, status: FriendStatus, is_requester: bool, added_at: DateTime<Utc>) -> Self {
        Self {
            user_id: peer.user_id.clone(),
            full_name: peer.full_name.clone(),
            username: peer.username.clone(),
            avatar_url: peer.avatar_url.clone(),
            stats: peer.stats(),
            status,
            is_requester,
            added_at,
        }
    }

    /// Replace the cached snapshot with freshly fetched values.
    pub fn overlay(&self, live: &UserData) -> Self {
        Self {
            full_name: live.full_name.clone(),
            username: live.username.clone(),
            avatar_url: live.avatar_url.clone(),
            stats: live.stats(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub invite_code: String,
    pub creator_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    pub fn from_user(user: &UserData, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user.user_id.clone(),
            full_name: user.full_name.clone(),
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            stats: user.stats(),
            joined_at,
        }
    }

    pub fn overlay(&self, live: &UserData) -> Self {
        Self {
            full_name: live.full_name.clone(),
            username: live.username.clone(),
            avatar_url: live.avatar_url.clone(),
            stats: live.stats(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subproject {
    pub subproject_id: String,
    pub name: String,
    #[serde(default)]
    pub total_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_unset: bool,
    #[serde(default)]
    pub subprojects: Vec<Subproject>,
    #[serde(default)]
    pub total_minutes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AchievementCriteria {
    FocusHours,
    DayStreak,
    SessionCount,
    LongestSession,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub criteria: AchievementCriteria,
    pub target_value: f64,
    #[serde(default)]
    pub is_unlocked: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl Achievement {
    pub fn new(id: &str, title: &str, description: &str, criteria: AchievementCriteria, target_value: f64) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            criteria,
            target_value,
            is_unlocked: false,
            unlocked_at: None,
        }
    }

    pub fn unlocked(&self, at: DateTime<Utc>) -> Self {
        Self {
            is_unlocked: true,
            unlocked_at: Some(at),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FriendRequest,
    FriendAccepted,
    Nudge,
    GroupJoined,
    AchievementUnlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl AppNotification {
    pub fn new(notification_type: NotificationType, sender: Option<&UserData>, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type,
            sender_id: sender.map(|u| u.user_id.clone()),
            sender_name: sender.map(|u| u.username.clone()),
            message,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_on(y: i32, m: u32, d: u32, minutes: u32) -> FocusSession {
        FocusSession::new(minutes, None, Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap())
    }

    #[test]
    fn friend_document_uses_camel_case_and_flattened_stats() {
        let mut peer = UserData::new("u2", "b@example.com", "Bea", "bea");
        peer.focus_hours = 12.5;
        let friend = Friend::from_peer(&peer, FriendStatus::Pending, true, Utc::now());
        let doc = to_document(&friend).unwrap();
        assert_eq!(doc["status"], "pending");
        assert_eq!(doc["isRequester"], true);
        assert_eq!(doc["focusHours"], 12.5);
        assert!(doc["addedAt"].is_i64());

        let back: Friend = from_document(&doc).unwrap();
        assert_eq!(back.stats.focus_hours, 12.5);
    }

    #[test]
    fn streak_grows_on_consecutive_days_and_resets_after_gap() {
        let user = UserData::new("u1", "a@example.com", "Ann", "ann");
        let user = user.apply_session(session_on(2026, 3, 1, 60));
        assert_eq!(user.day_streak, 1);
        let user = user.apply_session(session_on(2026, 3, 2, 30));
        assert_eq!(user.day_streak, 2);
        let user = user.apply_session(session_on(2026, 3, 2, 30));
        assert_eq!(user.day_streak, 2);
        let user = user.apply_session(session_on(2026, 3, 5, 30));
        assert_eq!(user.day_streak, 1);
        assert_eq!(user.focus_hours, 2.5);
        assert_eq!(user.session_count(), 4);
    }

    #[test]
    fn monthly_hours_restart_in_a_new_month() {
        let user = UserData::new("u1", "a@example.com", "Ann", "ann")
            .apply_session(session_on(2026, 1, 31, 120))
            .apply_session(session_on(2026, 2, 1, 60));
        assert_eq!(user.focus_hours, 3.0);
        assert_eq!(user.focus_hours_this_month, 1.0);
        assert_eq!(user.day_streak, 2);
    }

    #[test]
    fn longest_session_defaults_to_zero() {
        let user = UserData::new("u1", "a@example.com", "Ann", "ann");
        assert_eq!(user.longest_session(), 0);
        let user = user.apply_session(session_on(2026, 1, 1, 45)).apply_session(session_on(2026, 1, 2, 90));
        assert_eq!(user.longest_session(), 90);
    }

    #[test]
    fn rank_follows_hours() {
        assert_eq!(Rank::for_hours(0.0), Rank::Novice);
        assert_eq!(Rank::for_hours(10.0), Rank::Apprentice);
        assert_eq!(Rank::for_hours(620.0), Rank::Legend);
        let user = UserData::new("u1", "a@example.com", "Ann", "ann").with_stats(120.0, 4.0, 3);
        assert_eq!(user.rank, Rank::Expert);
    }
}
