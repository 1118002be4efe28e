//! Conversation history persistence
//!
//! History is stored as a versioned JSON snapshot of every envelope. Reload
//! goes through [`ReconciliationEngine::restore`](crate::ReconciliationEngine::restore),
//! which replays envelopes through the live dedup/ordering path, so a restart
//! reproduces exactly the order continuous operation would have produced.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::MessageEnvelope;
use crate::errors::{DechatError, Result};

/// Current snapshot schema
pub const SCHEMA_VERSION: u32 = 1;

/// Serialized form of the full conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub schema_version: u32,
    pub envelopes: Vec<MessageEnvelope>,
}

impl HistorySnapshot {
    pub fn new(envelopes: Vec<MessageEnvelope>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            envelopes,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: HistorySnapshot = serde_json::from_str(json)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(DechatError::persistence_error(format!(
                "unsupported history schema version {} (expected {})",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(snapshot)
    }

    /// Write the snapshot atomically: temporary file first, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(self.to_json()?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), envelopes = self.envelopes.len(), "Saved history snapshot");
        Ok(())
    }

    /// Load a snapshot; a missing file is an empty history
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(Vec::new()));
        }
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
