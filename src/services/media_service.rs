use std::sync::Arc;

use log::{info, warn};

use crate::services::user_service::{ProfileUpdate, UserService};
use crate::storage::ObjectStorage;
use crate::utils::image_cache::ImageCache;
use crate::utils::images::{compress_image, ImageKind, UPLOAD_JPEG_QUALITY};
use crate::utils::task_pool::TaskPool;

/// Compress an image for upload: downscale to the kind's limit, re-encode as JPEG.
pub async fn prepare_upload(pool: &TaskPool, kind: ImageKind, bytes: Vec<u8>) -> anyhow::Result<Vec<u8>> {
    pool.submit(move || compress_image(&bytes, kind.max_dimension(), UPLOAD_JPEG_QUALITY))
        .join()
        .await?
}

/// Uploads profile images and serves them back through the image cache.
#[derive(Clone)]
pub struct ImageUploader {
    storage: ObjectStorage,
    users: UserService,
    pool: Arc<TaskPool>,
    cache: ImageCache,
}

impl ImageUploader {
    pub fn new(storage: ObjectStorage, users: UserService, pool: Arc<TaskPool>, cache: ImageCache) -> Self {
        Self { storage, users, pool, cache }
    }

    pub async fn upload_avatar(&self, uid: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        self.upload(uid, ImageKind::Avatar, bytes).await
    }

    pub async fn upload_banner(&self, uid: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        self.upload(uid, ImageKind::Banner, bytes).await
    }

    async fn upload(&self, uid: &str, kind: ImageKind, bytes: Vec<u8>) -> anyhow::Result<String> {
        let compressed = prepare_upload(&self.pool, kind, bytes).await?;
        let url = self.storage.put(&kind.object_path(uid), &compressed).await?;

        let update = match kind {
            ImageKind::Avatar => ProfileUpdate { avatar_url: Some(url.clone()), ..Default::default() },
            ImageKind::Banner => ProfileUpdate { banner_url: Some(url.clone()), ..Default::default() },
        };
        self.users.update_profile(uid, update).await?;

        // Same URL, new bytes.
        self.cache.invalidate(&url).await;
        info!("[IMAGES] Uploaded {:?} for {} ({} bytes)", kind, uid, compressed.len());
        Ok(url)
    }

    /// Image bytes for a URL produced by an upload, cached by URL. Below upload
    /// quality the fetched image is re-encoded at the connection's quality.
    pub async fn load_image(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let Some(object_path) = self.storage.object_path_for_url(url) else {
            warn!("[IMAGES] Not a storage URL: {}", url);
            return None;
        };
        let storage = self.storage.clone();
        let pool = self.pool.clone();
        let quality = self.cache.effective_quality(UPLOAD_JPEG_QUALITY);
        self.cache
            .get_or_fetch(url, || async move {
                let bytes = storage.get(&object_path).await?;
                if quality >= UPLOAD_JPEG_QUALITY {
                    return Ok(bytes);
                }
                pool.submit(move || compress_image(&bytes, u32::MAX, quality)).join().await?
            })
            .await
    }

    /// Warm the cache with the first few URLs the current connection allows.
    pub async fn prefetch(&self, urls: &[String]) -> usize {
        let mut loaded = 0;
        for url in self.cache.prefetch_candidates(urls) {
            if self.load_image(url).await.is_some() {
                loaded += 1;
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use crate::utils::connection_quality::{ConnectionQuality, ConnectionQualityMonitor};
    use image::{GenericImageView, ImageOutputFormat, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("raw_focus_{}_{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn avatar_upload_updates_profile_and_serves_bytes() {
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let quality = ConnectionQualityMonitor::new();
        let users = UserService::new(store, quality.clone());
        users.create_user("u1", "a@example.com", "Ann", "ann").await.unwrap();

        let root = scratch_dir("media");
        let uploader = ImageUploader::new(
            ObjectStorage::new(&root),
            users.clone(),
            Arc::new(TaskPool::new(1)),
            ImageCache::new(8, quality),
        );

        let url = uploader.upload_avatar("u1", png(1024, 512)).await.unwrap();
        assert_eq!(users.get_user_data("u1").await.unwrap().avatar_url.as_deref(), Some(url.as_str()));

        let bytes = uploader.load_image(&url).await.unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (512, 256));

        assert!(uploader.upload_banner("u1", b"not an image".to_vec()).await.is_err());
        std::fs::remove_dir_all(root).ok();
    }

    async fn uploader_at(storage: &ObjectStorage, quality: ConnectionQuality) -> ImageUploader {
        let monitor = ConnectionQualityMonitor::starting_at(quality);
        let store = Arc::new(DocumentStore::in_memory().await.unwrap());
        let users = UserService::new(store, monitor.clone());
        ImageUploader::new(storage.clone(), users, Arc::new(TaskPool::new(1)), ImageCache::new(4, monitor))
    }

    #[tokio::test]
    async fn load_image_reencodes_only_below_upload_quality() {
        let root = scratch_dir("media_quality");
        let storage = ObjectStorage::new(&root);
        let original = png(64, 48);
        let url = storage.put("avatars/raw.png", &original).await.unwrap();

        let excellent = uploader_at(&storage, ConnectionQuality::Excellent).await;
        assert_eq!(excellent.load_image(&url).await.unwrap().as_slice(), original.as_slice());

        let poor = uploader_at(&storage, ConnectionQuality::Poor).await;
        let bytes = poor.load_image(&url).await.unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (64, 48));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn prepare_upload_keeps_small_images() {
        let pool = TaskPool::new(1);
        let out = prepare_upload(&pool, ImageKind::Banner, png(300, 200)).await.unwrap();
        assert_eq!(image::load_from_memory(&out).unwrap().dimensions(), (300, 200));
    }
}
