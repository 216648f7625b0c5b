//! Error types for configuration and the shared data model

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required setting is missing
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidConfig(_) => "INVALID_CONFIG",
            CoreError::MissingConfig(_) => "MISSING_CONFIG",
            CoreError::ConfigParse(_) => "CONFIG_PARSE",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::ConfigParse(err.to_string())
    }
}
