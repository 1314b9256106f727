use thiserror::Error;

/// Errors produced while parsing, encrypting, or otherwise operating on a
/// config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input error: {0}")]
    InputError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error(
        "unable to decrypt, config file has no `crypto` property, or the crypto provider is not enabled"
    )]
    CryptoDisabled,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("could not find a value at {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn input_error(message: impl Into<String>) -> Self {
        ConfigError::InputError(message.into())
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        ConfigError::ParseError(message.into())
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        ConfigError::ProviderError(message.into())
    }

    pub fn not_found(key_path: impl Into<String>) -> Self {
        ConfigError::NotFound(key_path.into())
    }

    /// True for errors caused by what the caller supplied, rather than by
    /// the environment (a bad keypath vs. a provider that can't reach AWS).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ConfigError::InputError(_) | ConfigError::NotFound(_) | ConfigError::CryptoDisabled
        )
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
