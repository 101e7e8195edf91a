//! Adaptive resource policy driven by measured request latency.
//!
//! The monitor keeps one [`ConnectionQuality`] level behind a `watch` channel so
//! screens and caches can follow it. Degradation of more than one level is adopted
//! at once; improvement climbs one level per sample.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

const LEVELS: [ConnectionQuality; 5] = [
    ConnectionQuality::Offline,
    ConnectionQuality::Poor,
    ConnectionQuality::Fair,
    ConnectionQuality::Good,
    ConnectionQuality::Excellent,
];

impl ConnectionQuality {
    pub fn level(self) -> usize {
        self as usize
    }

    fn from_level(level: usize) -> Self {
        LEVELS[level.min(LEVELS.len() - 1)]
    }

    /// Level suggested by a single latency sample.
    pub fn from_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=99 => ConnectionQuality::Excellent,
            100..=299 => ConnectionQuality::Good,
            300..=999 => ConnectionQuality::Fair,
            _ => ConnectionQuality::Poor,
        }
    }

    /// Hysteresis between the current level and a suggested one.
    pub fn next(self, suggested: ConnectionQuality) -> ConnectionQuality {
        let current = self.level();
        let target = suggested.level();
        if target + 1 < current {
            suggested
        } else if target > current {
            Self::from_level(current + 1)
        } else {
            self
        }
    }

    pub fn policy(self) -> QualityPolicy {
        match self {
            ConnectionQuality::Offline => QualityPolicy {
                cache_ttl: Duration::from_secs(24 * 60 * 60),
                batch_size: 5,
                prefetch_count: 0,
                image_quality: 0.5,
                request_timeout: Duration::from_secs(5),
            },
            ConnectionQuality::Poor => QualityPolicy {
                cache_ttl: Duration::from_secs(60 * 60),
                batch_size: 5,
                prefetch_count: 1,
                image_quality: 0.5,
                request_timeout: Duration::from_secs(30),
            },
            ConnectionQuality::Fair => QualityPolicy {
                cache_ttl: Duration::from_secs(30 * 60),
                batch_size: 10,
                prefetch_count: 3,
                image_quality: 0.7,
                request_timeout: Duration::from_secs(20),
            },
            ConnectionQuality::Good => QualityPolicy {
                cache_ttl: Duration::from_secs(15 * 60),
                batch_size: 20,
                prefetch_count: 5,
                image_quality: 0.85,
                request_timeout: Duration::from_secs(15),
            },
            ConnectionQuality::Excellent => QualityPolicy {
                cache_ttl: Duration::from_secs(5 * 60),
                batch_size: 50,
                prefetch_count: 10,
                image_quality: 1.0,
                request_timeout: Duration::from_secs(10),
            },
        }
    }
}

/// Fixed resource settings for one quality level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPolicy {
    pub cache_ttl: Duration,
    pub batch_size: usize,
    pub prefetch_count: usize,
    pub image_quality: f32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConnectionQualityMonitor {
    state: Arc<watch::Sender<ConnectionQuality>>,
}

impl Default for ConnectionQualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionQualityMonitor {
    pub fn new() -> Self {
        Self::starting_at(ConnectionQuality::Good)
    }

    pub fn starting_at(quality: ConnectionQuality) -> Self {
        let (state, _) = watch::channel(quality);
        Self { state: Arc::new(state) }
    }

    pub fn current(&self) -> ConnectionQuality {
        *self.state.borrow()
    }

    pub fn policy(&self) -> QualityPolicy {
        self.current().policy()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionQuality> {
        self.state.subscribe()
    }

    pub fn is_offline(&self) -> bool {
        self.current() == ConnectionQuality::Offline
    }

    /// Feed one latency sample; returns the level after hysteresis.
    pub fn measure_latency(&self, latency: Duration) -> ConnectionQuality {
        let suggested = ConnectionQuality::from_latency(latency);
        self.transition(|current| current.next(suggested), "latency sample")
    }

    /// A failed remote call drops straight to `Poor`. Offline stays offline.
    pub fn record_error(&self) -> ConnectionQuality {
        self.transition(
            |current| match current {
                ConnectionQuality::Offline => ConnectionQuality::Offline,
                _ => ConnectionQuality::Poor,
            },
            "request error",
        )
    }

    pub fn set_offline(&self) {
        self.transition(|_| ConnectionQuality::Offline, "set offline");
    }

    /// Coming back online always restarts from `Good`.
    pub fn set_online(&self) {
        self.transition(|_| ConnectionQuality::Good, "set online");
    }

    /// Run a remote call under the current request timeout, feeding its latency or
    /// failure back into the monitor. Nothing is retried.
    pub async fn measure<T, F>(&self, operation: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        if self.is_offline() {
            return Err(anyhow!("connection is offline"));
        }
        let timeout = self.policy().request_timeout;
        let started = Instant::now();
        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                self.measure_latency(started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_error();
                Err(e)
            }
            Err(_) => {
                self.record_error();
                Err(anyhow!("request timed out after {:?}", timeout))
            }
        }
    }

    fn transition<F>(&self, next: F, reason: &str) -> ConnectionQuality
    where
        F: FnOnce(ConnectionQuality) -> ConnectionQuality,
    {
        let mut previous = ConnectionQuality::Offline;
        self.state.send_if_modified(|quality| {
            previous = *quality;
            let updated = next(*quality);
            if updated == *quality {
                return false;
            }
            *quality = updated;
            true
        });
        let current = self.current();
        if current != previous {
            if current < previous {
                warn!("[QUALITY] {:?} -> {:?} ({})", previous, current, reason);
            } else {
                info!("[QUALITY] {:?} -> {:?} ({})", previous, current, reason);
            }
        } else {
            debug!("[QUALITY] staying {:?} ({})", current, reason);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_thresholds() {
        assert_eq!(ConnectionQuality::from_latency(Duration::from_millis(99)), ConnectionQuality::Excellent);
        assert_eq!(ConnectionQuality::from_latency(Duration::from_millis(100)), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::from_latency(Duration::from_millis(999)), ConnectionQuality::Fair);
        assert_eq!(ConnectionQuality::from_latency(Duration::from_millis(2999)), ConnectionQuality::Poor);
        assert_eq!(ConnectionQuality::from_latency(Duration::from_secs(10)), ConnectionQuality::Poor);
    }

    #[test]
    fn fast_sample_from_good_climbs_one_level() {
        let monitor = ConnectionQualityMonitor::new();
        assert_eq!(monitor.measure_latency(Duration::from_millis(50)), ConnectionQuality::Excellent);
    }

    #[test]
    fn improvement_is_capped_at_one_level() {
        let monitor = ConnectionQualityMonitor::starting_at(ConnectionQuality::Poor);
        assert_eq!(monitor.measure_latency(Duration::from_millis(20)), ConnectionQuality::Fair);
        assert_eq!(monitor.measure_latency(Duration::from_millis(20)), ConnectionQuality::Good);
        assert_eq!(monitor.measure_latency(Duration::from_millis(20)), ConnectionQuality::Excellent);
    }

    #[test]
    fn large_drop_is_immediate() {
        let monitor = ConnectionQualityMonitor::new();
        assert_eq!(monitor.measure_latency(Duration::from_millis(5000)), ConnectionQuality::Poor);
    }

    #[test]
    fn single_level_drop_is_ignored() {
        let monitor = ConnectionQualityMonitor::new();
        assert_eq!(monitor.measure_latency(Duration::from_millis(500)), ConnectionQuality::Good);
    }

    #[test]
    fn overrides_and_errors() {
        let monitor = ConnectionQualityMonitor::starting_at(ConnectionQuality::Excellent);
        assert_eq!(monitor.record_error(), ConnectionQuality::Poor);
        monitor.set_offline();
        assert_eq!(monitor.record_error(), ConnectionQuality::Offline);
        monitor.set_online();
        assert_eq!(monitor.current(), ConnectionQuality::Good);
    }

    #[test]
    fn policy_scales_with_quality() {
        let poor = ConnectionQuality::Poor.policy();
        let excellent = ConnectionQuality::Excellent.policy();
        assert!(poor.cache_ttl > excellent.cache_ttl);
        assert!(poor.batch_size < excellent.batch_size);
        assert!(poor.image_quality < excellent.image_quality);
        assert_eq!(ConnectionQuality::Offline.policy().prefetch_count, 0);
    }

    #[tokio::test]
    async fn measure_records_failures_and_refuses_when_offline() {
        let monitor = ConnectionQualityMonitor::new();
        let failed: anyhow::Result<()> = monitor.measure(async { Err(anyhow!("boom")) }).await;
        assert!(failed.is_err());
        assert_eq!(monitor.current(), ConnectionQuality::Poor);

        let ok = monitor.measure(async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
        assert_eq!(monitor.current(), ConnectionQuality::Fair);

        monitor.set_offline();
        assert!(monitor.measure(async { Ok(1) }).await.is_err());
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let monitor = ConnectionQualityMonitor::new();
        let mut rx = monitor.subscribe();
        monitor.set_offline();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionQuality::Offline);
    }
}
