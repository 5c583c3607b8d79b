use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("server '{server}' uses unsupported transport '{transport}'")]
    UnsupportedTransport { server: String, transport: String },

    #[error("server '{server}' uses the stdio transport but has no 'command'")]
    MissingCommand { server: String },

    #[error("server '{server}' uses an HTTP transport but has no 'endpoint'")]
    MissingEndpoint { server: String },

    #[error("server '{server}' is configured more than once")]
    DuplicateServer { server: String },

    #[error("'{field}' must be greater than zero")]
    InvalidLimit { field: &'static str },

    #[error("no [provider] section configured - a model provider is required to run the agent")]
    MissingProvider,
}
