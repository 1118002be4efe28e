//! Content addressing for image payloads
//!
//! The content hash is computed locally (SHA-256), so identical bytes map to
//! the same hash on every machine. Only the retrieval locator depends on the
//! storage collaborator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dechat_core::{ContentHash, Result, StorageConfig, StorageError, ValidationError};
use tracing::{debug, warn};

/// External content-addressed store
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload `bytes` under `hash`, returning a retrieval locator. An empty
    /// locator means the gateway URL template applies.
    async fn put(
        &self,
        hash: &ContentHash,
        bytes: &[u8],
    ) -> core::result::Result<String, StorageError>;
}

/// Hash and locator of an uploaded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content_hash: ContentHash,
    pub locator: String,
}

/// Turns binary payloads into `(content_hash, locator)` pairs
#[derive(Clone)]
pub struct ContentAddresser {
    gateway: Arc<dyn StorageGateway>,
    config: StorageConfig,
}

impl ContentAddresser {
    pub fn new(gateway: Arc<dyn StorageGateway>, config: StorageConfig) -> Self {
        Self { gateway, config }
    }

    /// Content hash of `bytes` without uploading
    pub fn hash(bytes: &[u8]) -> ContentHash {
        ContentHash::of(bytes)
    }

    /// Upload with the configured timeout
    pub async fn store(&self, bytes: &[u8]) -> Result<StoredContent> {
        self.store_with_timeout(bytes, self.config.upload_timeout())
            .await
    }

    /// Upload with a caller-supplied timeout
    pub async fn store_with_timeout(&self, bytes: &[u8], timeout: Duration) -> Result<StoredContent> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }
        if bytes.len() > self.config.max_payload_bytes {
            return Err(StorageError::PayloadTooLarge {
                size: bytes.len(),
                max: self.config.max_payload_bytes,
            }
            .into());
        }

        let content_hash = Self::hash(bytes);
        let locator = match tokio::time::timeout(timeout, self.gateway.put(&content_hash, bytes)).await
        {
            Ok(Ok(locator)) => locator,
            Ok(Err(err)) => {
                warn!(hash = %content_hash.to_hex(), error = %err, "Storage upload failed");
                return Err(err.into());
            }
            Err(_) => {
                let duration_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(hash = %content_hash.to_hex(), duration_ms, "Storage upload timed out");
                return Err(StorageError::Timeout { duration_ms }.into());
            }
        };

        let locator = if locator.trim().is_empty() {
            self.config.locator_for(&content_hash.to_hex())
        } else {
            locator
        };

        debug!(hash = %content_hash.to_hex(), size = bytes.len(), %locator, "Stored content");
        Ok(StoredContent {
            content_hash,
            locator,
        })
    }
}

impl core::fmt::Debug for ContentAddresser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContentAddresser")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dechat_core::DechatError;

    struct EchoGateway {
        delay: Duration,
    }

    #[async_trait]
    impl StorageGateway for EchoGateway {
        async fn put(
            &self,
            _hash: &ContentHash,
            _bytes: &[u8],
        ) -> core::result::Result<String, StorageError> {
            tokio::time::sleep(self.delay).await;
            Ok(String::new())
        }
    }

    fn addresser(delay: Duration, max: usize) -> ContentAddresser {
        let config = StorageConfig {
            max_payload_bytes: max,
            ..StorageConfig::default()
        };
        ContentAddresser::new(Arc::new(EchoGateway { delay }), config)
    }

    #[tokio::test]
    async fn test_identical_bytes_same_hash() {
        let addresser = addresser(Duration::ZERO, 1024);
        let a = addresser.store(b"image bytes").await.unwrap();
        let b = addresser.store(b"image bytes").await.unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(
            a.locator,
            format!("https://gateway.pinata.cloud/ipfs/{}", a.content_hash.to_hex())
        );
    }

    #[tokio::test]
    async fn test_size_limit_checked_before_upload() {
        let addresser = addresser(Duration::from_secs(60), 4);
        let err = addresser.store(b"too large").await.unwrap_err();
        assert!(matches!(
            err,
            DechatError::Storage(StorageError::PayloadTooLarge { size: 9, max: 4 })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upload_timeout_is_retryable() {
        let addresser = addresser(Duration::from_secs(60), 1024);
        let err = addresser
            .store_with_timeout(b"slow", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DechatError::Storage(StorageError::Timeout { duration_ms: 10 })
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let addresser = addresser(Duration::ZERO, 1024);
        assert!(matches!(
            addresser.store(&[]).await,
            Err(DechatError::Validation(ValidationError::EmptyPayload))
        ));
    }
}
