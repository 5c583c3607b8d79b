use super::error::ConfigError;
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How the client reaches a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    InMemory,
    Sse,
    StreamableHttp,
    Stdio,
}

impl TransportKind {
    /// Accepts the canonical names plus a few spellings seen in older configs.
    /// `httpStream` is the deprecated name of streamable HTTP.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inmemory" | "in-memory" | "in_memory" | "memory" => Some(Self::InMemory),
            "sse" => Some(Self::Sse),
            "streamablehttp" | "streamable-http" | "streamable_http" | "httpstream" | "http" => {
                Some(Self::StreamableHttp)
            }
            "stdio" => Some(Self::Stdio),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InMemory => "inMemory",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamableHttp",
            Self::Stdio => "stdio",
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Self::Sse | Self::StreamableHttp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportKind,
    pub endpoint: Option<String>,
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub headers: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub enabled: bool,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            endpoint: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
            headers: HashMap::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            enabled: true,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.command = Some(command.into());
        self.args = args;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawServer {
    name: String,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    enabled: Option<bool>,
}

impl RawServer {
    /// Explicit transport wins; otherwise a command implies stdio and an endpoint implies
    /// streamable HTTP. Anything else is treated as a built-in in-memory server.
    fn resolve_transport(&self) -> Result<TransportKind, ConfigError> {
        match self.transport.as_deref() {
            Some(raw) => TransportKind::parse(raw).ok_or_else(|| ConfigError::UnsupportedTransport {
                server: self.name.clone(),
                transport: raw.to_string(),
            }),
            None if self.command.is_some() => Ok(TransportKind::Stdio),
            None if self.endpoint.is_some() => Ok(TransportKind::StreamableHttp),
            None => Ok(TransportKind::InMemory),
        }
    }
}

impl TryFrom<RawServer> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawServer) -> Result<Self, Self::Error> {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        let transport = raw.resolve_transport()?;
        let command = raw.command.as_deref().map(|c| PathBuf::from(expand(c)));
        let endpoint = raw
            .endpoint
            .as_deref()
            .map(expand)
            .filter(|e| !e.trim().is_empty());

        match transport {
            TransportKind::Stdio if command.is_none() => {
                return Err(ConfigError::MissingCommand { server: raw.name });
            }
            kind if kind.is_http() && endpoint.is_none() => {
                return Err(ConfigError::MissingEndpoint { server: raw.name });
            }
            _ => {}
        }
        if raw.timeout_seconds == Some(0) {
            return Err(ConfigError::InvalidLimit {
                field: "servers.timeout_seconds",
            });
        }

        Ok(Self {
            transport,
            endpoint,
            command,
            args: raw.args.iter().map(|arg| expand(arg)).collect(),
            env: raw.env,
            workdir: raw.workdir.map(|d| PathBuf::from(expand(&d))),
            headers: raw
                .headers
                .into_iter()
                .map(|(key, value)| (key, expand(&value)))
                .collect(),
            timeout_seconds: raw.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            enabled: raw.enabled.unwrap_or(true),
            name: raw.name,
        })
    }
}
