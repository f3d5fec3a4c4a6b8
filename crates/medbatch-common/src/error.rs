//! Error types shared across the medbatch workspace

use thiserror::Error;

/// Result type alias for medbatch operations
pub type Result<T> = std::result::Result<T, MedbatchError>;

/// Main error type for medbatch
#[derive(Error, Debug)]
pub enum MedbatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl MedbatchError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_message() {
        let err = MedbatchError::config("missing STAGING_DIR");
        assert_eq!(err.to_string(), "Configuration error: missing STAGING_DIR");
    }

    #[test]
    fn parse_error_displays_message() {
        let err = MedbatchError::parse("Invalid log level: verbose");
        assert_eq!(err.to_string(), "Parse error: Invalid log level: verbose");
    }
}
