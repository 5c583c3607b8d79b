use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Closed set of failure categories. Callers branch on this, never on message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpErrorKind {
    Connection,
    ConnectionClosed,
    Timeout { timeout_ms: u64 },
    ToolCall { tool: String },
    ToolNotFound { tool: String },
    Transport { transport: String },
    Cors,
    ServerNotFound,
    InvalidParams,
    InitializationFailed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpErrorCode {
    Unknown,
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionClosed,
    ToolCallFailed,
    ToolNotFound,
    InvalidParams,
    ServerNotFound,
    TransportError,
    CorsError,
    InitializationFailed,
}

impl McpErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "MCP_UNKNOWN",
            Self::ConnectionFailed => "MCP_CONNECTION_FAILED",
            Self::ConnectionTimeout => "MCP_CONNECTION_TIMEOUT",
            Self::ConnectionClosed => "MCP_CONNECTION_CLOSED",
            Self::ToolCallFailed => "MCP_TOOL_CALL_FAILED",
            Self::ToolNotFound => "MCP_TOOL_NOT_FOUND",
            Self::InvalidParams => "MCP_INVALID_PARAMS",
            Self::ServerNotFound => "MCP_SERVER_NOT_FOUND",
            Self::TransportError => "MCP_TRANSPORT_ERROR",
            Self::CorsError => "MCP_CORS_ERROR",
            Self::InitializationFailed => "MCP_INITIALIZATION_FAILED",
        }
    }
}

impl fmt::Display for McpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified tool-server failure.
///
/// Every error that reaches the orchestration loop is one of these. The original
/// error, when there was one, stays reachable through [`StdError::source`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct McpError {
    pub kind: McpErrorKind,
    pub message: String,
    pub server: Option<String>,
    #[source]
    pub cause: Option<BoxError>,
    pub timestamp: DateTime<Utc>,
}

impl McpError {
    pub fn new(kind: McpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            server: None,
            cause: None,
            timestamp: Utc::now(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Connection, message)
    }

    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::ConnectionClosed, message)
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::new(McpErrorKind::Timeout { timeout_ms }, message)
    }

    pub fn tool_call(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::ToolCall { tool: tool.into() }, message)
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        let message = format!("tool '{tool}' is not available on any connected server");
        Self::new(McpErrorKind::ToolNotFound { tool }, message)
    }

    pub fn transport(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            McpErrorKind::Transport {
                transport: transport.into(),
            },
            message,
        )
    }

    pub fn cors(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Cors, message)
    }

    pub fn server_not_found(server: impl Into<String>) -> Self {
        let server = server.into();
        Self::new(
            McpErrorKind::ServerNotFound,
            format!("MCP server '{server}' is not configured"),
        )
        .with_server(server)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::InvalidParams, message)
    }

    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::InitializationFailed, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(McpErrorKind::Unknown, message)
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn code(&self) -> McpErrorCode {
        match self.kind {
            McpErrorKind::Connection => McpErrorCode::ConnectionFailed,
            McpErrorKind::ConnectionClosed => McpErrorCode::ConnectionClosed,
            McpErrorKind::Timeout { .. } => McpErrorCode::ConnectionTimeout,
            McpErrorKind::ToolCall { .. } => McpErrorCode::ToolCallFailed,
            McpErrorKind::ToolNotFound { .. } => McpErrorCode::ToolNotFound,
            McpErrorKind::Transport { .. } => McpErrorCode::TransportError,
            McpErrorKind::Cors => McpErrorCode::CorsError,
            McpErrorKind::ServerNotFound => McpErrorCode::ServerNotFound,
            McpErrorKind::InvalidParams => McpErrorCode::InvalidParams,
            McpErrorKind::InitializationFailed => McpErrorCode::InitializationFailed,
            McpErrorKind::Unknown => McpErrorCode::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            McpErrorKind::Connection | McpErrorKind::ConnectionClosed => "MCPConnectionError",
            McpErrorKind::Timeout { .. } => "MCPTimeoutError",
            McpErrorKind::ToolCall { .. } | McpErrorKind::ToolNotFound { .. } => {
                "MCPToolCallError"
            }
            McpErrorKind::Transport { .. } => "MCPTransportError",
            McpErrorKind::Cors => "MCPCorsError",
            _ => "MCPError",
        }
    }

    /// Connection-level failures worth another connect attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            McpErrorKind::Connection | McpErrorKind::ConnectionClosed | McpErrorKind::Timeout { .. }
        )
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self.kind {
            McpErrorKind::Timeout { timeout_ms } => Some(timeout_ms),
            _ => None,
        }
    }

    /// Diagnostic rendering with the shared fields.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name(),
            "code": self.code().as_str(),
            "message": self.message,
            "serverName": self.server,
            "timestamp": self.timestamp.to_rfc3339(),
            "cause": self.cause.as_ref().map(|cause| cause.to_string()),
        })
    }
}
