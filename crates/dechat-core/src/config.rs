//! Centralized Configuration Management
//!
//! All tunables of the messaging core live here so the CLI and embedding
//! applications can load them from a single file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DechatError, Result};
use crate::types::ChainId;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Wallet session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Chain the wallet must be on; `None` accepts any chain
    pub expected_chain_id: Option<ChainId>,
    /// Upper bound on the wallet provider's account request
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_chain_id: None,
            connect_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Storage Configuration
// ----------------------------------------------------------------------------

/// Content-addressed storage behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Largest payload accepted for upload, in bytes
    pub max_payload_bytes: usize,
    /// Default upload timeout when the caller supplies none
    pub upload_timeout_ms: u64,
    /// Locator template; `{hash}` is replaced with the hex content hash
    pub gateway_url_template: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 10 * 1024 * 1024,
            upload_timeout_ms: 20_000,
            gateway_url_template: "https://gateway.pinata.cloud/ipfs/{hash}".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// Render the retrieval locator for a content hash
    pub fn locator_for(&self, hash_hex: &str) -> String {
        self.gateway_url_template.replace("{hash}", hash_hex)
    }
}

// ----------------------------------------------------------------------------
// Transfer Configuration
// ----------------------------------------------------------------------------

/// Value transfer lifecycle behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Default wait for chain inclusion
    pub inclusion_timeout_ms: u64,
    /// How long a watcher follows a transfer before giving up
    pub finality_timeout_ms: u64,
    /// Settled (finalized or reverted) records kept for inspection; older
    /// ones are dropped on the next submission
    pub settled_record_limit: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            inclusion_timeout_ms: 120_000,
            finality_timeout_ms: 15 * 60 * 1000,
            settled_record_limit: 1_024,
        }
    }
}

impl TransferConfig {
    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_millis(self.inclusion_timeout_ms)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_millis(self.finality_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Composer Configuration
// ----------------------------------------------------------------------------

/// Text validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Maximum text length in characters
    pub max_text_length: usize,
    /// Reject NUL bytes and control characters
    pub strict_content_validation: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_text_length: 4_096,
            strict_content_validation: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the engine's event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for events flowing into the engine task
    pub event_buffer_size: usize,
    /// Buffer size for chain notifications per watched transfer
    pub notification_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            notification_buffer_size: 16,
        }
    }
}

// ----------------------------------------------------------------------------
// Persistence Configuration
// ----------------------------------------------------------------------------

/// Conversation history persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Snapshot file; `None` keeps history in memory only
    pub history_path: Option<PathBuf>,
    /// Write the snapshot after every applied event, not just at shutdown
    pub autosave: bool,
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the messaging core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DechatConfig {
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub composer: ComposerConfig,
    pub channels: ChannelConfig,
    pub persistence: PersistenceConfig,
}

impl DechatConfig {
    /// Short timeouts and small buffers for tests
    pub fn testing() -> Self {
        Self {
            session: SessionConfig {
                expected_chain_id: None,
                connect_timeout_ms: 1_000,
            },
            storage: StorageConfig {
                max_payload_bytes: 64 * 1024,
                upload_timeout_ms: 500,
                ..StorageConfig::default()
            },
            transfer: TransferConfig {
                inclusion_timeout_ms: 1_000,
                finality_timeout_ms: 5_000,
                settled_record_limit: 64,
            },
            composer: ComposerConfig::default(),
            channels: ChannelConfig {
                event_buffer_size: 32,
                notification_buffer_size: 8,
            },
            persistence: PersistenceConfig::default(),
        }
    }

    /// Reject configurations that would make the runtime unusable
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_payload_bytes == 0 {
            return Err(DechatError::config_error(
                "storage.max_payload_bytes must be greater than zero",
            ));
        }
        if !self.storage.gateway_url_template.contains("{hash}") {
            return Err(DechatError::config_error(
                "storage.gateway_url_template must contain a {hash} placeholder",
            ));
        }
        if self.storage.upload_timeout_ms == 0
            || self.transfer.inclusion_timeout_ms == 0
            || self.session.connect_timeout_ms == 0
        {
            return Err(DechatError::config_error("timeouts must be non-zero"));
        }
        if self.transfer.finality_timeout_ms < self.transfer.inclusion_timeout_ms {
            return Err(DechatError::config_error(
                "transfer.finality_timeout_ms must not be shorter than inclusion_timeout_ms",
            ));
        }
        if self.composer.max_text_length == 0 {
            return Err(DechatError::config_error(
                "composer.max_text_length must be greater than zero",
            ));
        }
        if self.channels.event_buffer_size == 0 || self.channels.notification_buffer_size == 0 {
            return Err(DechatError::config_error("channel buffers must be non-empty"));
        }
        if self.persistence.autosave && self.persistence.history_path.is_none() {
            return Err(DechatError::config_error(
                "persistence.autosave requires persistence.history_path",
            ));
        }
        Ok(())
    }
}
