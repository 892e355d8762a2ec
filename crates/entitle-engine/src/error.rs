//! # Engine Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Domain      │  │    Storage      │  │   Configuration         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NoMatchingRule │  │  Busy / Pool    │  │  InvalidConfig          │ │
//! │  │  InvalidWindow  │  │  Connection     │  │  ConfigLoadFailed       │ │
//! │  │  Validation     │  │  Constraint     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Only transient storage errors are retried.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use entitle_core::{CoreError, ErrorKind};
use entitle_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the jobs, the gate and configuration loading.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Domain rule violation or invalid input.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if the failed operation may succeed when retried.
    ///
    /// Only transient storage faults qualify; a missing rule or a constraint
    /// violation will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(db) => db.is_transient(),
            _ => false,
        }
    }

    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Core(core) => core.kind(),
            EngineError::Storage(DbError::NotFound { .. }) => ErrorKind::NotFound,
            EngineError::Storage(DbError::Validation(_)) => ErrorKind::Validation,
            EngineError::Storage(db) if db.is_transient() => ErrorKind::Transient,
            EngineError::Storage(_) => ErrorKind::Permanent,
            EngineError::InvalidConfig(_) | EngineError::ConfigLoadFailed(_) => {
                ErrorKind::Validation
            }
            EngineError::ChannelError(_) => ErrorKind::Transient,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_) | EngineError::ConfigLoadFailed(_)
        )
    }
}
