pub mod identity;
pub mod session_store;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::sync::RwLock;

use crate::common::models::UserData;
use crate::config::AppConfig;
use crate::services::user_service::UserService;
use crate::store::DocumentStore;

pub use identity::{IdentityProvider, IdentitySession};
pub use session_store::SessionStore;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password too weak")]
    WeakPassword,
    #[error("email already in use")]
    EmailAlreadyInUse,
    #[error("user not found")]
    UserNotFound,
    #[error("wrong password")]
    WrongPassword,
    #[error("identity store error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "invalid-email",
            AuthError::WeakPassword => "weak-password",
            AuthError::EmailAlreadyInUse => "email-already-in-use",
            AuthError::UserNotFound => "user-not-found",
            AuthError::WrongPassword => "wrong-password",
            AuthError::Internal(_) => "internal-error",
        }
    }

    /// Text safe to show to the user. Sign-in failures share one message so it
    /// does not reveal which emails are registered.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "Please enter a valid email address.",
            AuthError::WeakPassword => "Password must be at least 6 characters.",
            AuthError::EmailAlreadyInUse => "An account with this email may already exist.",
            AuthError::UserNotFound | AuthError::WrongPassword => "Invalid email or password.",
            AuthError::Internal(_) => "Something went wrong. Please try again.",
        }
    }
}

#[derive(Debug, Clone)]
struct SignedIn {
    uid: String,
    token: String,
}

/// Sign-up, sign-in and the current session of this client.
#[derive(Clone)]
pub struct AuthService {
    identity: IdentityProvider,
    users: UserService,
    sessions: SessionStore,
    persist_session: bool,
    current: Arc<RwLock<Option<SignedIn>>>,
}

impl AuthService {
    /// Creates the identity tables in the store's database when missing.
    pub async fn new(store: &DocumentStore, users: UserService, config: &AppConfig) -> anyhow::Result<Self> {
        let identity = IdentityProvider::new(store.pool.clone(), config.argon2_salt_length, config.session_expiry_days);
        identity.migrate().await.context("creating identity tables")?;
        let expired = identity.cleanup_expired_sessions().await;
        if expired > 0 {
            info!("[AUTH] Removed {} expired sessions", expired);
        }
        Ok(Self {
            identity,
            users,
            sessions: SessionStore::new(config.keyring_fallback),
            persist_session: config.persist_session,
            current: Arc::new(RwLock::new(None)),
        })
    }

    pub fn with_session_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_session_persistence(mut self, persist: bool) -> Self {
        self.persist_session = persist;
        self
    }

    async fn remember(&self, session: IdentitySession) {
        if self.persist_session {
            if let Err(e) = self.sessions.save(&session.token) {
                warn!("[AUTH] Session not persisted: {}", e);
            }
        }
        *self.current.write().await = Some(SignedIn {
            uid: session.uid,
            token: session.token,
        });
    }

    /// Create the identity, then the user record. Both failures propagate.
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str, username: &str) -> anyhow::Result<UserData> {
        let session = self.identity.create_account(email, password).await?;
        let user = self
            .users
            .create_user(&session.uid, email.trim(), full_name.trim(), username.trim())
            .await?;
        info!("[AUTH] Signed up {}", user.username);
        self.remember(session).await;
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserData, AuthError> {
        let session = self.identity.sign_in(email, password).await?;
        let user = self
            .users
            .get_user_data(&session.uid)
            .await
            .ok_or_else(|| AuthError::Internal(format!("no user record for {}", session.uid)))?;
        info!("[AUTH] Signed in {}", user.username);
        self.remember(session).await;
        Ok(user)
    }

    pub async fn sign_out(&self) {
        let previous = self.current.write().await.take();
        if let Some(signed_in) = previous {
            self.identity.revoke(&signed_in.token).await;
            info!("[AUTH] Signed out {}", signed_in.uid);
        }
        if self.persist_session {
            self.sessions.clear();
        }
    }

    pub async fn current_uid(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|s| s.uid.clone())
    }

    pub async fn current_user(&self) -> Option<UserData> {
        let uid = self.current_uid().await?;
        self.users.get_user_data(&uid).await
    }

    /// Resume a persisted session if its token is still valid.
    pub async fn restore_session(&self) -> Option<UserData> {
        let token = self.sessions.load()?;
        let Some(uid) = self.identity.validate_session(&token).await else {
            info!("[AUTH] Stored session expired");
            self.sessions.clear();
            return None;
        };
        *self.current.write().await = Some(SignedIn { uid: uid.clone(), token });
        self.users.get_user_data(&uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_failures_share_a_message() {
        assert_eq!(AuthError::UserNotFound.user_message(), AuthError::WrongPassword.user_message());
        assert_ne!(AuthError::UserNotFound.code(), AuthError::WrongPassword.code());
    }
}
