//! Mock content-addressed storage
//!
//! Keeps uploaded objects in memory. Supports simulated latency, random
//! unavailability, scripted one-shot failures, and pausing uploads so a
//! test can act while an upload is in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dechat_core::{ContentHash, StorageError};
use dechat_runtime::StorageGateway;
use tokio::sync::{watch, Notify};
use tracing::debug;

// ----------------------------------------------------------------------------
// Mock Storage Configuration
// ----------------------------------------------------------------------------

/// Configuration for mock storage behavior
#[derive(Debug, Clone)]
pub struct MockStorageConfig {
    /// Simulated upload latency range (min, max) in milliseconds
    pub latency_range: (u64, u64),
    /// Probability that an upload fails with `Unavailable`
    pub failure_rate: f64,
    /// Locator returned for uploads; empty makes the runtime use its URL template
    pub locator_prefix: String,
}

impl Default for MockStorageConfig {
    fn default() -> Self {
        Self {
            latency_range: (1, 5),
            failure_rate: 0.0,
            locator_prefix: "ipfs://".to_string(),
        }
    }
}

impl MockStorageConfig {
    /// Instant, always-available storage
    pub fn ideal() -> Self {
        Self {
            latency_range: (0, 0),
            failure_rate: 0.0,
            locator_prefix: "ipfs://".to_string(),
        }
    }

    /// Slow storage that fails a fifth of all uploads
    pub fn flaky() -> Self {
        Self {
            latency_range: (20, 80),
            failure_rate: 0.2,
            locator_prefix: "ipfs://".to_string(),
        }
    }
}

/// Upload counters
#[derive(Debug, Default)]
pub struct MockStorageStats {
    pub uploads_attempted: AtomicU64,
    pub uploads_stored: AtomicU64,
    pub uploads_failed: AtomicU64,
}

// ----------------------------------------------------------------------------
// Mock Storage
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockStorage {
    config: MockStorageConfig,
    objects: Mutex<HashMap<ContentHash, Vec<u8>>>,
    scripted_failures: Mutex<VecDeque<StorageError>>,
    paused: watch::Sender<bool>,
    upload_started: Notify,
    stats: Arc<MockStorageStats>,
}

impl MockStorage {
    pub fn new(config: MockStorageConfig) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            config,
            objects: Mutex::new(HashMap::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            paused,
            upload_started: Notify::new(),
            stats: Arc::new(MockStorageStats::default()),
        }
    }

    pub fn ideal() -> Self {
        Self::new(MockStorageConfig::ideal())
    }

    pub fn flaky() -> Self {
        Self::new(MockStorageConfig::flaky())
    }

    /// Fail the next upload with `error`, ahead of any random failure
    pub fn fail_next(&self, error: StorageError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Hold every upload until [`resume_uploads`](Self::resume_uploads)
    pub fn pause_uploads(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_uploads(&self) {
        self.paused.send_replace(false);
    }

    /// Resolves once an upload has entered the store
    pub async fn upload_started(&self) {
        self.upload_started.notified().await;
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    pub fn object_count(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> Arc<MockStorageStats> {
        Arc::clone(&self.stats)
    }

    fn next_failure(&self) -> Option<StorageError> {
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.or_else(|| {
            (fastrand::f64() < self.config.failure_rate).then(|| StorageError::Unavailable {
                reason: "mock storage node unreachable".into(),
            })
        })
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new(MockStorageConfig::default())
    }
}

#[async_trait]
impl StorageGateway for MockStorage {
    async fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<String, StorageError> {
        self.stats.uploads_attempted.fetch_add(1, Ordering::Relaxed);
        self.upload_started.notify_one();

        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;

        let (min, max) = self.config.latency_range;
        let latency = fastrand::u64(min..=max);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(error) = self.next_failure() {
            self.stats.uploads_failed.fetch_add(1, Ordering::Relaxed);
            debug!(hash = %hash.to_hex(), %error, "Mock storage rejected upload");
            return Err(error);
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*hash, bytes.to_vec());
        self.stats.uploads_stored.fetch_add(1, Ordering::Relaxed);

        if self.config.locator_prefix.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("{}{}", self.config.locator_prefix, hash.to_hex()))
        }
    }
}
