//! Object storage for user images, rooted at a local directory.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use log::info;

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    root: PathBuf,
}

impl ObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, object_path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(object_path);
        if object_path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object path: {}", object_path);
        }
        Ok(self.root.join(relative))
    }

    pub async fn put(&self, object_path: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let target = self.resolve(object_path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {:?}", parent))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("writing {:?}", target))?;
        info!("[STORAGE] Stored {} ({} bytes)", object_path, bytes.len());
        self.url_for(object_path)
    }

    pub async fn get(&self, object_path: &str) -> anyhow::Result<Vec<u8>> {
        let target = self.resolve(object_path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("reading {:?}", target))
    }

    /// Deleting a missing object is not an error.
    pub async fn delete(&self, object_path: &str) -> anyhow::Result<()> {
        let target = self.resolve(object_path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting {:?}", target)),
        }
    }

    pub fn url_for(&self, object_path: &str) -> anyhow::Result<String> {
        let target = self.resolve(object_path)?;
        Ok(format!("file://{}", target.display()))
    }

    /// Object path for a URL produced by [`ObjectStorage::url_for`].
    pub fn object_path_for_url(&self, url: &str) -> Option<String> {
        let path = url.strip_prefix("file://")?;
        let relative = Path::new(path).strip_prefix(&self.root).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("raw_focus_storage_{}_{}", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn put_get_delete() {
        let storage = ObjectStorage::new(temp_root("roundtrip"));
        let url = storage.put("users/u1/avatar.jpg", b"jpeg").await.unwrap();
        assert!(url.ends_with("users/u1/avatar.jpg"));
        assert_eq!(storage.get("users/u1/avatar.jpg").await.unwrap(), b"jpeg");
        assert_eq!(storage.object_path_for_url(&url).as_deref(), Some("users/u1/avatar.jpg"));

        storage.delete("users/u1/avatar.jpg").await.unwrap();
        storage.delete("users/u1/avatar.jpg").await.unwrap();
        assert!(storage.get("users/u1/avatar.jpg").await.is_err());
        let _ = tokio::fs::remove_dir_all(storage.root()).await;
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let storage = ObjectStorage::new(temp_root("escape"));
        assert!(storage.put("../outside.jpg", b"x").await.is_err());
        assert!(storage.put("/etc/passwd", b"x").await.is_err());
    }
}
