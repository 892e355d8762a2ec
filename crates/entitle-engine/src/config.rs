//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ENTITLE_DB_PATH=/var/lib/entitle/entitle.db                        │
//! │     ENTITLE_RECONCILE_HOUR=13                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/entitle-engine/engine.toml (Linux)                       │
//! │     ~/Library/Application Support/com.entitle.engine/engine.toml       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/entitle/entitle.db"
//! max_connections = 5
//!
//! [schedule]
//! enabled = true
//! reconcile_hour = 13
//! reset_hour = 0
//! utc_offset_minutes = 480
//!
//! [reconcile]
//! max_retries = 3
//! initial_backoff_secs = 2
//! max_backoff_secs = 300
//! use_watermark = true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::FixedOffset;
use entitle_db::DbConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::retry::exponential_backoff;

// =============================================================================
// Database Settings
// =============================================================================

/// Where the entitlement store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Pool size. The gate is the only concurrent caller.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "entitle", "engine")
        .map(|dirs| dirs.data_dir().join("entitle.db"))
        .unwrap_or_else(|| PathBuf::from("./entitle.db"))
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

impl DatabaseSettings {
    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.path).max_connections(self.max_connections)
    }
}

// =============================================================================
// Schedule Settings
// =============================================================================

/// Wall-clock triggers for the two daily jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Run the scheduler at all. One-shot commands ignore this.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local hour of the reconciliation run and of its window cutoff.
    #[serde(default = "default_reconcile_hour")]
    pub reconcile_hour: u32,

    /// Local hour of the quota reset.
    #[serde(default)]
    pub reset_hour: u32,

    /// Offset of the business timezone from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_true() -> bool {
    true
}

fn default_reconcile_hour() -> u32 {
    13
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            enabled: true,
            reconcile_hour: default_reconcile_hour(),
            reset_hour: 0,
            utc_offset_minutes: 0,
        }
    }
}

impl ScheduleSettings {
    /// The business timezone.
    pub fn offset(&self) -> EngineResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

// =============================================================================
// Reconcile Settings
// =============================================================================

/// Retry and windowing behavior of the reconciliation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Attempts per order, the first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait after the first failed attempt (seconds). Doubles per attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Upper bound for a single wait (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Start scheduled windows at the persisted watermark instead of a fixed
    /// one-day lookback.
    #[serde(default = "default_true")]
    pub use_watermark: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    2
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            use_watermark: true,
        }
    }
}

impl ReconcileSettings {
    /// Builds the production backoff strategy.
    pub fn backoff(&self) -> ExponentialBackoff {
        exponential_backoff(
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
        )
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document. Missing sections and keys take defaults.
    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.schedule.reconcile_hour > 23 {
            return Err(EngineError::InvalidConfig(format!(
                "reconcile_hour must be 0-23, got {}",
                self.schedule.reconcile_hour
            )));
        }

        if self.schedule.reset_hour > 23 {
            return Err(EngineError::InvalidConfig(format!(
                "reset_hour must be 0-23, got {}",
                self.schedule.reset_hour
            )));
        }

        self.schedule.offset()?;

        if self.reconcile.max_retries == 0 {
            return Err(EngineError::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }

        if self.reconcile.initial_backoff_secs > self.reconcile.max_backoff_secs {
            return Err(EngineError::InvalidConfig(
                "initial_backoff_secs must not exceed max_backoff_secs".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ENTITLE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(hour) = lookup("ENTITLE_RECONCILE_HOUR") {
            match hour.parse() {
                Ok(h) => self.schedule.reconcile_hour = h,
                Err(_) => warn!(value = %hour, "Ignoring invalid ENTITLE_RECONCILE_HOUR"),
            }
        }

        if let Some(hour) = lookup("ENTITLE_RESET_HOUR") {
            match hour.parse() {
                Ok(h) => self.schedule.reset_hour = h,
                Err(_) => warn!(value = %hour, "Ignoring invalid ENTITLE_RESET_HOUR"),
            }
        }

        if let Some(offset) = lookup("ENTITLE_UTC_OFFSET_MINUTES") {
            match offset.parse() {
                Ok(m) => self.schedule.utc_offset_minutes = m,
                Err(_) => warn!(value = %offset, "Ignoring invalid ENTITLE_UTC_OFFSET_MINUTES"),
            }
        }

        if let Some(retries) = lookup("ENTITLE_MAX_RETRIES") {
            match retries.parse() {
                Ok(n) => self.reconcile.max_retries = n,
                Err(_) => warn!(value = %retries, "Ignoring invalid ENTITLE_MAX_RETRIES"),
            }
        }

        if let Some(enabled) = lookup("ENTITLE_SCHEDULER_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.schedule.enabled = true,
                "0" | "false" | "no" | "off" => self.schedule.enabled = false,
                _ => warn!(value = %enabled, "Ignoring invalid ENTITLE_SCHEDULER_ENABLED"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "entitle", "engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}
