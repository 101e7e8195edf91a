pub mod stats_cache;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::common::models::UserData;

pub use stats_cache::StatsCache;

/// Read-through cache of user records sitting in front of the document store.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<UserData>>;
    async fn put_user(&self, user: &UserData, ttl: Duration) -> Result<()>;
    async fn invalidate_user(&self, uid: &str) -> Result<()>;
}
