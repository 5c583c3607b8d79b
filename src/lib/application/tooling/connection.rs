use super::error::McpError;
use super::transport::McpTransport;
use super::types::{CallToolOptions, ToolCallRequest, ToolCallResult, ToolInfo};
use crate::config::{ServerConfig, TransportKind};
use crate::constants::RECONNECT_DELAY_MS;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ConnectionState {
    status: ConnectionStatus,
    refs: usize,
    tools: Arc<Vec<ToolInfo>>,
    last_error: Option<String>,
}

/// One configured tool server, shared by every run that uses it.
///
/// `acquire`/`release` are reference counted: the transport is connected on the
/// first acquire and closed only when the last holder releases it. The state lock
/// is never held across transport I/O, so readers never wait on a reconnect.
pub struct ServerConnection {
    config: ServerConfig,
    transport: Arc<dyn McpTransport>,
    state: AsyncMutex<ConnectionState>,
    /// Serializes connect and close against each other.
    lifecycle: AsyncMutex<()>,
    retry_delay: Duration,
}

impl ServerConnection {
    pub fn new(config: ServerConfig, transport: Arc<dyn McpTransport>) -> Self {
        Self::with_retry_delay(config, transport, Duration::from_millis(RECONNECT_DELAY_MS))
    }

    pub fn with_retry_delay(
        config: ServerConfig,
        transport: Arc<dyn McpTransport>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            config,
            transport,
            state: AsyncMutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                refs: 0,
                tools: Arc::new(Vec::new()),
                last_error: None,
            }),
            lifecycle: AsyncMutex::new(()),
            retry_delay,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn ref_count(&self) -> usize {
        self.state.lock().await.refs
    }

    /// Tools listed at connect time; empty unless connected.
    pub async fn tools(&self) -> Arc<Vec<ToolInfo>> {
        let state = self.state.lock().await;
        if state.status == ConnectionStatus::Connected {
            Arc::clone(&state.tools)
        } else {
            Arc::new(Vec::new())
        }
    }

    pub async fn acquire(&self) -> Result<Arc<Vec<ToolInfo>>, McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock().await;
            if state.status == ConnectionStatus::Connected {
                state.refs += 1;
                debug!(server = %self.config.name, refs = state.refs, "Reusing server connection");
                return Ok(Arc::clone(&state.tools));
            }
            state.status = ConnectionStatus::Connecting;
        }

        let result = self.connect_with_retry().await;
        let mut state = self.state.lock().await;
        match result {
            Ok(tools) => {
                info!(
                    server = %self.config.name,
                    transport = %self.transport.kind(),
                    tools = tools.len(),
                    "Server connected"
                );
                state.status = ConnectionStatus::Connected;
                state.refs = 1;
                state.tools = Arc::new(tools);
                state.last_error = None;
                Ok(Arc::clone(&state.tools))
            }
            Err(err) => {
                state.status = ConnectionStatus::Error;
                state.refs = 0;
                state.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn connect_with_retry(&self) -> Result<Vec<ToolInfo>, McpError> {
        let mut attempt: u32 = 0;
        loop {
            let result = async {
                self.transport.connect().await?;
                self.transport.list_tools().await
            }
            .await;

            let err = match result {
                Ok(tools) => return Ok(tools),
                Err(err) if err.server.is_none() => err.with_server(&self.config.name),
                Err(err) => err,
            };
            let _ = self.transport.close().await;

            if !err.is_retryable() || attempt >= self.config.max_retries {
                warn!(server = %self.config.name, attempt, error = %err, "Failed to connect server");
                return Err(err);
            }
            attempt += 1;
            warn!(
                server = %self.config.name,
                attempt,
                max_retries = self.config.max_retries,
                error = %err,
                "Connection failed, retrying"
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Drop one reference; the last one closes the transport.
    pub async fn release(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock().await;
            if state.refs == 0 {
                return Ok(());
            }
            state.refs -= 1;
            if state.refs > 0 {
                return Ok(());
            }
            state.status = ConnectionStatus::Disconnected;
            state.tools = Arc::new(Vec::new());
        }
        info!(server = %self.config.name, "Closing server connection");
        self.transport.close().await
    }

    pub async fn call_tool(
        &self,
        request: ToolCallRequest,
        options: CallToolOptions,
    ) -> Result<ToolCallResult, McpError> {
        if self.status().await != ConnectionStatus::Connected {
            return Err(McpError::connection(format!(
                "server '{}' is not connected",
                self.config.name
            ))
            .with_server(&self.config.name));
        }
        let options = CallToolOptions {
            timeout: options.timeout.or(Some(self.config.timeout())),
        };
        self.transport.call_tool(request, None, options).await
    }
}

#[cfg(test)]
mod tests;
