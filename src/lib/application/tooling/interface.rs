use super::catalog::ToolDescriptor;
use super::error::McpError;
use super::types::ToolCallResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// What the orchestration loop needs from the tool side. Errors are already classified.
#[async_trait]
pub trait ToolServerInterface: Send + Sync {
    async fn invoke_tool(
        &self,
        tool: &ToolDescriptor,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, McpError>;
}
