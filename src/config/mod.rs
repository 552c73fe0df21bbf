//! Loadable settings for agents.
//!
//! ```rust,no_run
//! use agent_middleware::config::Settings;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env("AGENT_")?;
//! let json = Settings::from_json_str(r#"{"recursion_limit": 10}"#)?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod settings;

pub use env::EnvConfigProvider;
pub use settings::{FailureMode, RetrySettings, Settings};

use thiserror::Error;

/// Errors that can occur while loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
