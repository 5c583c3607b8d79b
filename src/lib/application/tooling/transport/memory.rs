//! In-process tool servers reached without any wire protocol.

use super::rpc::attribute_to_tool;
use super::{McpTransport, bounded};
use crate::application::tooling::error::McpError;
use crate::application::tooling::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::TransportKind;
use crate::constants::servers;
use async_trait::async_trait;
use chrono::{FixedOffset, SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::debug;

/// What a built-in server has to provide. Prompts and resources default to empty.
#[async_trait]
pub trait ClientAdapter: Send + Sync {
    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError>;

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        meta: Option<Value>,
    ) -> Result<ToolCallResult, McpError>;

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        Ok(Vec::new())
    }
}

/// Wraps a [`ClientAdapter`] so it can sit behind [`McpTransport`] like any remote server.
pub struct CompatibleClient {
    server: String,
    adapter: Box<dyn ClientAdapter>,
}

impl CompatibleClient {
    pub fn new(server: impl Into<String>, adapter: Box<dyn ClientAdapter>) -> Self {
        Self {
            server: server.into(),
            adapter,
        }
    }
}

#[async_trait]
impl McpTransport for CompatibleClient {
    fn kind(&self) -> TransportKind {
        TransportKind::InMemory
    }

    async fn connect(&self) -> Result<(), McpError> {
        debug!(server = %self.server, "in-memory server ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.adapter.close().await
    }

    async fn ping(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        self.adapter
            .list_tools()
            .await
            .map_err(|err| err.with_server(&self.server))
    }

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        meta: Option<Value>,
        options: CallToolOptions,
    ) -> Result<ToolCallResult, McpError> {
        let tool = request.name.clone();
        let what = format!("tool '{tool}'");
        bounded(
            options.timeout,
            &self.server,
            &what,
            self.adapter.call_tool(request, meta),
        )
        .await
        .map_err(|err| attribute_to_tool(err, &tool).with_server(&self.server))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        self.adapter.list_prompts().await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        self.adapter.list_resources().await
    }
}

pub fn builtin_adapter(name: &str) -> Option<Box<dyn ClientAdapter>> {
    match name {
        servers::TIME => Some(Box::new(TimeServer)),
        _ => None,
    }
}

/// `@aether/time`: current wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeServer;

impl TimeServer {
    const CURRENT_TIME: &'static str = "get_current_time";
    const TIMESTAMP: &'static str = "get_timestamp";

    fn current_time(arguments: &serde_json::Map<String, Value>) -> Result<String, McpError> {
        let offset_minutes = match arguments.get("timezone_offset_minutes") {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                McpError::invalid_params("timezone_offset_minutes must be an integer")
            })?,
        };
        let offset = i32::try_from(offset_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                McpError::invalid_params(format!(
                    "timezone offset of {offset_minutes} minutes is out of range"
                ))
            })?;
        Ok(Utc::now()
            .with_timezone(&offset)
            .to_rfc3339_opts(SecondsFormat::Secs, false))
    }
}

#[async_trait]
impl ClientAdapter for TimeServer {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        Ok(vec![
            ToolInfo {
                name: Self::CURRENT_TIME.to_string(),
                description: Some(
                    "Get the current date and time, optionally shifted to a UTC offset".to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "timezone_offset_minutes": {
                            "type": "integer",
                            "description": "Offset from UTC in minutes, e.g. 480 for UTC+8"
                        }
                    }
                }),
            },
            ToolInfo {
                name: Self::TIMESTAMP.to_string(),
                description: Some("Get the current Unix timestamp in milliseconds".to_string()),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ])
    }

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        _meta: Option<Value>,
    ) -> Result<ToolCallResult, McpError> {
        match request.name.as_str() {
            Self::CURRENT_TIME => Self::current_time(&request.arguments).map(ToolCallResult::text),
            Self::TIMESTAMP => Ok(ToolCallResult::text(Utc::now().timestamp_millis().to_string())),
            other => Err(McpError::tool_not_found(other)),
        }
    }
}
