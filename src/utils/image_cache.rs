use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::utils::connection_quality::ConnectionQualityMonitor;

struct CachedImage {
    bytes: Arc<Vec<u8>>,
    stored_at: Instant,
}

/// In-memory image cache keyed by URL. Entry lifetime follows the current
/// connection quality; when full the oldest entry is evicted.
#[derive(Clone)]
pub struct ImageCache {
    entries: Arc<Mutex<HashMap<String, CachedImage>>>,
    max_entries: usize,
    quality: ConnectionQualityMonitor,
}

impl ImageCache {
    pub fn new(max_entries: usize, quality: ConnectionQualityMonitor) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_entries: max_entries.max(1),
            quality,
        }
    }

    pub async fn get(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let ttl = self.quality.policy().cache_ttl;
        let mut entries = self.entries.lock().await;
        match entries.get(url) {
            Some(entry) if entry.stored_at.elapsed() <= ttl => Some(entry.bytes.clone()),
            Some(_) => {
                debug!("[IMAGES] Expired {}", url);
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, url: &str, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let bytes = Arc::new(bytes);
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(url) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            url.to_string(),
            CachedImage {
                bytes: bytes.clone(),
                stored_at: Instant::now(),
            },
        );
        bytes
    }

    pub async fn invalidate(&self, url: &str) {
        self.entries.lock().await.remove(url);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached bytes for `url`, fetching and storing them on a miss.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Option<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        if let Some(bytes) = self.get(url).await {
            return Some(bytes);
        }
        match fetch().await {
            Ok(bytes) => Some(self.insert(url, bytes).await),
            Err(e) => {
                warn!("[IMAGES] Failed to fetch {}: {}", url, e);
                None
            }
        }
    }

    /// The leading URLs worth prefetching at the current quality.
    pub fn prefetch_candidates<'a>(&self, urls: &'a [String]) -> &'a [String] {
        let count = self.quality.policy().prefetch_count.min(urls.len());
        &urls[..count]
    }

    /// Scale a base JPEG quality by the current image-quality multiplier.
    pub fn effective_quality(&self, base: u8) -> u8 {
        let scaled = f32::from(base) * self.quality.policy().image_quality;
        scaled.round().clamp(1.0, 100.0) as u8
    }
}
