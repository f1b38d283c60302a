//! Configuration error types.

use std::path::PathBuf;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File extension is not yaml, yml, toml or json
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// File content could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Parsed configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<ConfigError> for gateway_core::GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
