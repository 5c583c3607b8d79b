//! One capability surface over every way of reaching a tool server.
//!
//! The concrete strategy is picked once, from [`ServerConfig::transport`], by
//! [`create_transport`].

mod memory;
mod rpc;
mod sse;
mod stdio;
mod streamable_http;

pub use memory::{ClientAdapter, CompatibleClient, TimeServer, builtin_adapter};
pub use rpc::{METHOD_NOT_FOUND, RpcError};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

use super::classify::ErrorClassifier;
use super::error::McpError;
use super::types::{CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo};
use crate::config::{ServerConfig, TransportKind};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish the channel and complete the MCP handshake.
    async fn connect(&self) -> Result<(), McpError>;

    async fn close(&self) -> Result<(), McpError>;

    /// Best-effort health check. Transports without a ping succeed.
    async fn ping(&self) -> Result<(), McpError>;

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError>;

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        meta: Option<Value>,
        options: CallToolOptions,
    ) -> Result<ToolCallResult, McpError>;

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError>;

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError>;
}

/// Network transports classify raw failures with `classifier`.
pub fn create_transport(
    config: &ServerConfig,
    classifier: &ErrorClassifier,
) -> Result<Arc<dyn McpTransport>, McpError> {
    let transport: Arc<dyn McpTransport> = match config.transport {
        TransportKind::Stdio => Arc::new(StdioTransport::new(config.clone())),
        TransportKind::StreamableHttp => Arc::new(StreamableHttpTransport::new(
            config.clone(),
            classifier.clone(),
        )?),
        TransportKind::Sse => Arc::new(SseTransport::new(config.clone(), classifier.clone())?),
        TransportKind::InMemory => {
            let adapter = builtin_adapter(&config.name).ok_or_else(|| {
                McpError::initialization_failed(format!(
                    "no built-in in-memory server named '{}'",
                    config.name
                ))
                .with_server(config.name.clone())
            })?;
            Arc::new(CompatibleClient::new(config.name.clone(), adapter))
        }
    };
    Ok(transport)
}

/// Bound `future` by `timeout`, failing with a timeout error that carries the bound.
pub(crate) async fn bounded<T, F>(
    timeout: Option<Duration>,
    server: &str,
    what: &str,
    future: F,
) -> Result<T, McpError>
where
    F: Future<Output = Result<T, McpError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => {
                let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                Err(
                    McpError::timeout(format!("{what} timed out after {millis} ms"), millis)
                        .with_server(server),
                )
            }
        },
        None => future.await,
    }
}
