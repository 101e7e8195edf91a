use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub storage_root: String,
    pub redis_url: Option<String>,
    pub log_level: String,
    pub worker_count: usize,
    pub argon2_salt_length: u32,
    pub session_expiry_days: u32,
    pub persist_session: bool,
    pub keyring_fallback: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/raw_focus.db".to_string()),
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "data/storage".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            worker_count: env::var("WORKER_COUNT").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(2),
            argon2_salt_length: env::var("ARGON2_SALT_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(16),
            session_expiry_days: env::var("SESSION_EXPIRY_DAYS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            persist_session: env::var("PERSIST_SESSION").map(|v| v == "true" || v == "1").unwrap_or(true),
            keyring_fallback: env::var("KEYRING_FALLBACK").unwrap_or_default() == "true",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            storage_root: "data/storage".to_string(),
            redis_url: None,
            log_level: "info".to_string(),
            worker_count: 2,
            argon2_salt_length: 16,
            session_expiry_days: 30,
            persist_session: false,
            keyring_fallback: false,
        }
    }
}
