use super::error::ConfigError;
use super::provider::ModelProviderConfig;
use super::server::ServerConfig;
use crate::constants::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_ITERATIONS};
use std::path::Path;

/// Application configuration loaded from client.toml
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// User-authored system prompt, appended last to the compiled prompt
    pub system_prompt: String,
    pub agent: AgentConfig,
    pub classifier: ClassifierConfig,
    pub provider: Option<ModelProviderConfig>,
    pub servers: Vec<ServerConfig>,
}

/// Limits for a single agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_consecutive_errors: usize,
    /// Overrides each server's own timeout for tool calls made by the loop
    pub tool_timeout_seconds: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            tool_timeout_seconds: None,
        }
    }
}

/// Localized substrings used when classifying raw error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub timeout_markers: Vec<String>,
    pub connect_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_markers: vec!["timeout".to_string(), "超时".to_string()],
            connect_markers: vec!["connect".to_string(), "连接".to_string()],
        }
    }
}

impl AppConfig {
    /// Load configuration from a file path (or default path if None)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        super::loader::load_config(path)
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|server| server.enabled)
    }

    pub fn require_provider(&self) -> Result<&ModelProviderConfig, ConfigError> {
        self.provider.as_ref().ok_or(ConfigError::MissingProvider)
    }
}
