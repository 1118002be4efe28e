//! DeChat CLI Configuration Management
//!
//! Configuration is layered with figment, highest priority first:
//! 1. Command line arguments
//! 2. Environment variables (`DECHAT_<SECTION>__<FIELD>`, e.g.
//!    `DECHAT_CLI__VERBOSE=true`)
//! 3. Configuration file (`--config`, or `dechat.toml` in the working
//!    directory when present)
//! 4. Default values
//!
//! Every section is optional; missing fields fall back to their defaults.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use dechat_core::{ChainId, ContentHash, DechatConfig, WalletAddress};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the DeChat CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// CLI-specific configuration
    pub cli: CliConfig,

    /// Wallet identity used by the demo
    pub identity: IdentityConfig,

    /// Messaging engine configuration
    pub core: DechatConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Maximum number of messages printed per conversation
    pub max_recent_messages: usize,

    /// History file name inside the data directory
    pub history_file: String,

    /// Data directory; when set the history lives at `<data_dir>/<history_file>`
    pub data_dir: Option<PathBuf>,
}

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed wallet address (0x-prefixed hex)
    pub address: Option<String>,

    /// Human-readable name; derives a stable address when `address` is unset
    pub name: Option<String>,

    /// Chain the demo wallet reports
    pub chain_id: u64,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            max_recent_messages: 50,
            history_file: "history.json".to_string(),
            data_dir: None,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            address: None,
            name: None,
            chain_id: 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        Self::require_file(path)?;

        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path));

        let config: AppConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!("Failed to load from {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with the standard priority order, applying
    /// command line overrides last
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        verbose: Option<bool>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) => {
                Self::require_file(path)?;
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        // Apply command line overrides
        if let Some(v) = verbose {
            figment = figment.merge(("cli.verbose", v));
        }
        if let Some(dir) = data_dir {
            figment = figment.merge(("cli.data_dir", dir));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load with overrides: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn require_file(path: &Path) -> Result<(), ConfigError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(ConfigError::FileSystem(format!(
                "Configuration file {} not found",
                path.display()
            )))
        }
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = self.to_toml()?;
        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if let Some(ref address) = self.identity.address {
            parse_address(address)?;
        }

        if self.cli.history_file.trim().is_empty() {
            return Err(ConfigError::Validation(
                "History file name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective local wallet address
    pub fn local_address(&self) -> Result<WalletAddress, ConfigError> {
        if let Some(ref address) = self.identity.address {
            return parse_address(address);
        }
        let name = self.identity.name.as_deref().unwrap_or("dechat-local");
        Ok(address_from_name(name))
    }

    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.identity.chain_id)
    }

    /// History file location; a data directory overrides the engine's path
    pub fn history_path(&self) -> Option<PathBuf> {
        match self.cli.data_dir {
            Some(ref dir) => Some(dir.join(&self.cli.history_file)),
            None => self.core.persistence.history_path.clone(),
        }
    }

    /// Configuration written by `dechat config`
    pub fn example() -> Self {
        AppConfig {
            identity: IdentityConfig {
                address: None,
                name: Some("my-wallet".to_string()),
                chain_id: 1,
            },
            ..Default::default()
        }
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        Self::example()
            .to_toml()
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dechat.toml";

/// Prefix of environment overrides; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "DECHAT_";

fn parse_address(address: &str) -> Result<WalletAddress, ConfigError> {
    address
        .parse()
        .map_err(|e| ConfigError::Validation(format!("Invalid wallet address {address}: {e}")))
}

/// Stable address derived from a name: the first 20 bytes of its SHA-256
pub fn address_from_name(name: &str) -> WalletAddress {
    let digest = ContentHash::of(name.as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[..20]);
    WalletAddress::new(bytes)
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
