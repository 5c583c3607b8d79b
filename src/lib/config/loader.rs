use super::app::{AgentConfig, AppConfig, ClassifierConfig};
use super::error::ConfigError;
use super::provider::{ModelProviderConfig, RawProviderConfig};
use super::server::{RawServer, ServerConfig};
use crate::constants::{CONFIG_PATH, ENV_PATH};
use dotenvy::from_filename;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Once;
use tracing::debug;

static ENV_LOADER: Once = Once::new();

/// Raw configuration structure for deserialization from TOML
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    agent: RawAgentConfig,
    #[serde(default)]
    classifier: Option<RawClassifierConfig>,
    #[serde(default)]
    provider: Option<RawProviderConfig>,
    #[serde(default)]
    servers: Vec<RawServer>,
}

#[derive(Debug, Deserialize, Default)]
struct RawAgentConfig {
    max_iterations: Option<usize>,
    max_consecutive_errors: Option<usize>,
    tool_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawClassifierConfig {
    #[serde(default)]
    timeout_markers: Option<Vec<String>>,
    #[serde(default)]
    connect_markers: Option<Vec<String>>,
}

/// Ensures environment variables are loaded from config/.env
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = from_filename(ENV_PATH);
    });
}

/// Load and validate configuration from a file path
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    ensure_env_loaded();
    let config_path = path.unwrap_or_else(|| Path::new(CONFIG_PATH));
    read_config(config_path)
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading client configuration file");

    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_and_build(parsed)
}

fn validate_and_build(parsed: RawConfig) -> Result<AppConfig, ConfigError> {
    let defaults = AgentConfig::default();
    let agent = AgentConfig {
        max_iterations: parsed.agent.max_iterations.unwrap_or(defaults.max_iterations),
        max_consecutive_errors: parsed
            .agent
            .max_consecutive_errors
            .unwrap_or(defaults.max_consecutive_errors),
        tool_timeout_seconds: parsed.agent.tool_timeout_seconds,
    };
    if agent.max_iterations == 0 {
        return Err(ConfigError::InvalidLimit {
            field: "agent.max_iterations",
        });
    }
    if agent.max_consecutive_errors == 0 {
        return Err(ConfigError::InvalidLimit {
            field: "agent.max_consecutive_errors",
        });
    }
    if agent.tool_timeout_seconds == Some(0) {
        return Err(ConfigError::InvalidLimit {
            field: "agent.tool_timeout_seconds",
        });
    }

    let classifier = match parsed.classifier {
        Some(raw) => {
            let defaults = ClassifierConfig::default();
            ClassifierConfig {
                timeout_markers: raw.timeout_markers.unwrap_or(defaults.timeout_markers),
                connect_markers: raw.connect_markers.unwrap_or(defaults.connect_markers),
            }
        }
        None => ClassifierConfig::default(),
    };

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(parsed.servers.len());
    for raw in parsed.servers {
        let server = ServerConfig::try_from(raw)?;
        if !seen.insert(server.name.clone()) {
            return Err(ConfigError::DuplicateServer {
                server: server.name,
            });
        }
        servers.push(server);
    }
    debug!(servers = servers.len(), "Validated tool server configuration");

    Ok(AppConfig {
        system_prompt: parsed.system_prompt.unwrap_or_default(),
        agent,
        classifier,
        provider: parsed.provider.map(ModelProviderConfig::from),
        servers,
    })
}
