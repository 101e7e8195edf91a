//! Local email/password identities stored next to the documents.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use log::{info, warn};
use rand::RngCore;
use sqlx::{Row, SqlitePool};

use super::AuthError;

const MIN_PASSWORD_LENGTH: usize = 6;

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn hash_password(password: &str, salt_length: u32) -> Result<String, AuthError> {
    let mut salt_bytes = vec![0u8; salt_length as usize];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Internal(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn generate_session_token() -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    format!("{}-{:x}", uuid, md5::compute(random))
}

/// A signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySession {
    pub uid: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct IdentityProvider {
    pool: SqlitePool,
    salt_length: u32,
    session_expiry_days: u32,
}

impl IdentityProvider {
    pub fn new(pool: SqlitePool, salt_length: u32, session_expiry_days: u32) -> Self {
        Self {
            pool,
            salt_length,
            session_expiry_days,
        }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identity_sessions (
                token TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_account(&self, email: &str, password: &str) -> Result<IdentitySession, AuthError> {
        let email = email.trim().to_lowercase();
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let existing = sqlx::query("SELECT uid FROM credentials WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(AuthError::EmailAlreadyInUse);
        }

        let uid = uuid::Uuid::new_v4().to_string();
        let password_hash = hash_password(password, self.salt_length)?;
        sqlx::query("INSERT INTO credentials (uid, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(&uid)
            .bind(&email)
            .bind(&password_hash)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        info!("[AUTH] Account created for uid {}", uid);
        self.open_session(&uid).await
    }

    /// Unknown email and wrong password surface as different variants here; callers
    /// must show [`AuthError::user_message`], which does not tell them apart.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<IdentitySession, AuthError> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query("SELECT uid, password_hash FROM credentials WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let uid: String = row.get("uid");
        let password_hash: String = row.get("password_hash");
        if !verify_password(&password_hash, password) {
            warn!("[AUTH] Sign-in rejected for uid {}", uid);
            return Err(AuthError::WrongPassword);
        }
        self.open_session(&uid).await
    }

    async fn open_session(&self, uid: &str) -> Result<IdentitySession, AuthError> {
        let token = generate_session_token();
        let now = Utc::now().timestamp();
        let expires = now + 60 * 60 * 24 * i64::from(self.session_expiry_days);
        sqlx::query("INSERT INTO identity_sessions (token, uid, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&token)
            .bind(uid)
            .bind(now)
            .bind(expires)
            .execute(&self.pool)
            .await?;
        Ok(IdentitySession {
            uid: uid.to_string(),
            token,
        })
    }

    /// The uid owning an unexpired session token.
    pub async fn validate_session(&self, token: &str) -> Option<String> {
        let row = sqlx::query("SELECT uid FROM identity_sessions WHERE token = ? AND expires_at > ?")
            .bind(token)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| warn!("[AUTH] Session lookup failed: {}", e))
            .ok()??;
        Some(row.get("uid"))
    }

    pub async fn revoke(&self, token: &str) -> bool {
        match sqlx::query("DELETE FROM identity_sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
        {
            Ok(r) => r.rows_affected() > 0,
            Err(e) => {
                warn!("[AUTH] Failed to revoke session: {}", e);
                false
            }
        }
    }

    pub async fn cleanup_expired_sessions(&self) -> u64 {
        match sqlx::query("DELETE FROM identity_sessions WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
        {
            Ok(r) => r.rows_affected(),
            Err(e) => {
                warn!("[AUTH] Failed to clean up sessions: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(valid_email("ann@example.com"));
        assert!(!valid_email("ann.example.com"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("ann@localhost"));
    }

    #[test]
    fn hashes_verify() {
        let hash = hash_password("hunter22", 16).unwrap();
        assert!(verify_password(&hash, "hunter22"));
        assert!(!verify_password(&hash, "hunter23"));
        assert!(!verify_password("not a hash", "hunter22"));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_session_token(), generate_session_token());
    }
}
