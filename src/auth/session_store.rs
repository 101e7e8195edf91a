use std::path::PathBuf;

use keyring::Entry;
use log::{debug, warn};

const SERVICE: &str = "raw_focus";
const ACCOUNT: &str = "raw_focus_session";

/// Where the signed-in session token survives restarts.
///
/// The OS keyring is tried first. The plain file is only used when it has been
/// explicitly enabled, and never holds anything the keyring accepted.
#[derive(Debug, Clone)]
pub struct SessionStore {
    use_keyring: bool,
    fallback_file: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(keyring_fallback: bool) -> Self {
        Self {
            use_keyring: true,
            fallback_file: keyring_fallback.then(|| PathBuf::from("data").join("session_token.txt")),
        }
    }

    /// File-only store, for machines without a keyring.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            use_keyring: false,
            fallback_file: Some(path.into()),
        }
    }

    fn entry() -> Entry {
        Entry::new(SERVICE, ACCOUNT)
    }

    pub fn save(&self, token: &str) -> anyhow::Result<()> {
        if self.use_keyring {
            match Self::entry().set_password(token) {
                Ok(()) => return Ok(()),
                Err(e) => debug!("[AUTH] Keyring write failed: {}", e),
            }
        }
        match &self.fallback_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, token)?;
                warn!("[AUTH] Keyring unavailable, session persisted to {:?}", path);
                Ok(())
            }
            None => Err(anyhow::anyhow!("keyring unavailable and file fallback disabled")),
        }
    }

    pub fn load(&self) -> Option<String> {
        if self.use_keyring {
            if let Ok(token) = Self::entry().get_password() {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }
        let path = self.fallback_file.as_ref()?;
        let token = std::fs::read_to_string(path).ok()?.trim().to_string();
        (!token.is_empty()).then_some(token)
    }

    pub fn clear(&self) {
        if self.use_keyring {
            let _ = Self::entry().delete_password();
        }
        if let Some(path) = &self.fallback_file {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("[AUTH] Could not remove {:?}: {}", path, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let path = std::env::temp_dir().join(format!("raw_focus_session_{}", uuid::Uuid::new_v4()));
        let store = SessionStore::file(&path);
        assert!(store.load().is_none());
        store.save("token-1").unwrap();
        assert_eq!(store.load().as_deref(), Some("token-1"));
        store.clear();
        assert!(store.load().is_none());
        assert!(!path.exists());
    }
}
