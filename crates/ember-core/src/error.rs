//! Error types for Ember

use thiserror::Error;

/// The main error type for Ember operations
#[derive(Debug, Error)]
pub enum EmberError {
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    #[error("Host error: {0}")]
    HostError(String),

    #[error("Physics error: {0}")]
    PhysicsError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for Ember operations
pub type Result<T> = std::result::Result<T, EmberError>;

impl From<toml::de::Error> for EmberError {
    fn from(err: toml::de::Error) -> Self {
        EmberError::TomlParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_errors_convert() {
        let err: EmberError = toml::from_str::<toml::Value>("= broken")
            .unwrap_err()
            .into();
        assert!(matches!(err, EmberError::TomlParseError(_)));
    }

    #[test]
    fn display_includes_payload() {
        let err = EmberError::UnknownEffect("fireball".into());
        assert_eq!(err.to_string(), "Unknown effect: fireball");
    }
}
