use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use super::UserCache;
use crate::common::models::UserData;

/// Redis cache of user records read by the friend and group live-stats overlays.
pub struct StatsCache {
    redis_manager: Arc<Mutex<ConnectionManager>>,
}

fn user_key(uid: &str) -> String {
    format!("raw:user:{}", uid)
}

impl StatsCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis_manager = ConnectionManager::new(client).await?;
        info!("[CACHE] Connected to {}", redis_url);
        Ok(Self {
            redis_manager: Arc::new(Mutex::new(redis_manager)),
        })
    }

    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.redis_manager.lock().await;
        let pong: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl UserCache for StatsCache {
    async fn get_user(&self, uid: &str) -> Result<Option<UserData>> {
        let mut conn = self.redis_manager.lock().await;
        let raw: Option<String> = redis::cmd("GET")
            .arg(user_key(uid))
            .query_async(&mut *conn)
            .await?;
        match raw {
            Some(json) => {
                debug!("[CACHE] Hit for user {}", uid);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn put_user(&self, user: &UserData, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(user)?;
        let mut conn = self.redis_manager.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(user_key(&user.user_id))
            .arg(ttl.as_secs().max(1))
            .arg(json)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn invalidate_user(&self, uid: &str) -> Result<()> {
        let mut conn = self.redis_manager.lock().await;
        let _: () = redis::cmd("DEL")
            .arg(user_key(uid))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(user_key("abc"), "raw:user:abc");
    }
}
