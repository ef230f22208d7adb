//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VEND_DB_PATH=/var/lib/vend/vend.db                                 │
//! │     VEND_INDEX_MAX_STALENESS_SECS=30                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/vend/vend.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.vend.vend/vend.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "vend.db"
//! max_connections = 5
//!
//! [pricing]
//! index_max_staleness_secs = 0     # 0 = rebuild before every pricing decision
//! index_refresh_interval_secs = 0  # 0 = no background refresher
//! max_item_quantity = 999
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vend_core::MAX_ITEM_QUANTITY;
use vend_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. `:memory:` gives a private in-memory database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vend.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Pricing Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSettings {
    /// How old a Promotion Index snapshot may be before a pricing decision
    /// rebuilds it. Zero rebuilds every time.
    #[serde(default)]
    pub index_max_staleness_secs: u64,

    /// Background rebuild interval. Zero disables the refresher.
    #[serde(default)]
    pub index_refresh_interval_secs: u64,

    #[serde(default = "default_max_item_quantity")]
    pub max_item_quantity: i64,
}

fn default_max_item_quantity() -> i64 {
    MAX_ITEM_QUANTITY
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            index_max_staleness_secs: 0,
            index_refresh_interval_secs: 0,
            max_item_quantity: default_max_item_quantity(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,
}

impl EngineConfig {
    /// Loads configuration from file and environment.
    ///
    /// ## Loading Order
    /// 1. Start with defaults
    /// 2. Load from TOML file (if exists)
    /// 3. Override with environment variables
    /// 4. Validate
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_ITEM_QUANTITY).contains(&self.pricing.max_item_quantity) {
            return Err(EngineError::InvalidConfig(format!(
                "pricing.max_item_quantity must be between 1 and {}",
                MAX_ITEM_QUANTITY
            )));
        }

        Ok(())
    }

    /// Applies `VEND_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("VEND_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = parsed(&lookup, "VEND_DB_MAX_CONNECTIONS") {
            self.database.max_connections = value;
        }

        if let Some(value) = parsed(&lookup, "VEND_INDEX_MAX_STALENESS_SECS") {
            self.pricing.index_max_staleness_secs = value;
        }

        if let Some(value) = parsed(&lookup, "VEND_INDEX_REFRESH_SECS") {
            self.pricing.index_refresh_interval_secs = value;
        }

        if let Some(value) = parsed(&lookup, "VEND_MAX_ITEM_QUANTITY") {
            self.pricing.max_item_quantity = value;
        }
    }

    /// Platform config file path (`vend.toml`).
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vend", "vend")
            .map(|dirs| dirs.config_dir().join("vend.toml"))
    }

    // =========================================================================
    // Derived Settings
    // =========================================================================

    pub fn db_config(&self) -> DbConfig {
        let config = DbConfig::new(self.database.path.clone());
        if config.is_in_memory() {
            return DbConfig::in_memory();
        }
        config.max_connections(self.database.max_connections)
    }

    pub fn index_max_staleness(&self) -> Duration {
        Duration::from_secs(self.pricing.index_max_staleness_secs)
    }

    /// The refresher interval, or `None` when it is disabled.
    pub fn index_refresh_interval(&self) -> Option<Duration> {
        match self.pricing.index_refresh_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
