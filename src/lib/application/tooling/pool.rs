use super::classify::ErrorClassifier;
use super::connection::{ConnectionStatus, ServerConnection};
use super::error::McpError;
use super::transport::{McpTransport, create_transport};
use super::types::ToolInfo;
use crate::config::ServerConfig;
use crate::constants::RECONNECT_DELAY_MS;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Every configured server, in configuration order.
pub struct ServerPool {
    connections: Vec<Arc<ServerConnection>>,
    retry_delay: Duration,
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerPool {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            retry_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }

    /// Applies to servers inserted afterwards.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Network transports classify their raw failures with `classifier`.
    pub fn from_configs<'a>(
        configs: impl IntoIterator<Item = &'a ServerConfig>,
        classifier: &ErrorClassifier,
    ) -> Result<Self, McpError> {
        let mut pool = Self::new();
        for config in configs {
            let transport = create_transport(config, classifier)?;
            pool.insert(config.clone(), transport);
        }
        Ok(pool)
    }

    /// Register a server; a server with the same name is replaced.
    pub fn insert(&mut self, config: ServerConfig, transport: Arc<dyn McpTransport>) {
        let connection = Arc::new(ServerConnection::with_retry_delay(
            config,
            transport,
            self.retry_delay,
        ));
        match self
            .connections
            .iter_mut()
            .find(|existing| existing.name() == connection.name())
        {
            Some(slot) => *slot = connection,
            None => self.connections.push(connection),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.iter().map(|connection| connection.name())
    }

    pub(crate) fn connections(&self) -> &[Arc<ServerConnection>] {
        &self.connections
    }

    pub fn get(&self, name: &str) -> Result<Arc<ServerConnection>, McpError> {
        self.connections
            .iter()
            .find(|connection| connection.name() == name)
            .cloned()
            .ok_or_else(|| McpError::server_not_found(name))
    }

    pub async fn acquire(&self, name: &str) -> Result<Arc<Vec<ToolInfo>>, McpError> {
        self.get(name)?.acquire().await
    }

    pub async fn release(&self, name: &str) -> Result<(), McpError> {
        self.get(name)?.release().await
    }

    /// Acquire every server, returning the names that connected. Failures are logged
    /// and leave that server in the error state.
    pub async fn acquire_all(&self) -> Vec<String> {
        let mut connected = Vec::new();
        for connection in &self.connections {
            match connection.acquire().await {
                Ok(_) => connected.push(connection.name().to_string()),
                Err(err) => {
                    warn!(server = %connection.name(), error = %err, "Server unavailable")
                }
            }
        }
        connected
    }

    pub async fn release_all(&self, names: &[String]) {
        for name in names {
            if let Err(err) = self.release(name).await {
                warn!(server = %name, error = %err, "Failed to close server");
            }
        }
    }

    pub async fn statuses(&self) -> Vec<(String, ConnectionStatus)> {
        let mut statuses = Vec::with_capacity(self.connections.len());
        for connection in &self.connections {
            statuses.push((connection.name().to_string(), connection.status().await));
        }
        statuses
    }
}
