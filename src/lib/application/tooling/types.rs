use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A tool as advertised by one server's `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallToolOptions {
    pub timeout: Option<Duration>,
}

impl CallToolOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Outcome of one `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub success: bool,
    /// Joined text blocks when the server only sent text, otherwise the raw content
    pub content: Value,
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Value::String(text.into()),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            content: Value::String(message.clone()),
            error: Some(message),
        }
    }

    /// Build from a `tools/call` result object (`content` blocks plus `isError`).
    pub fn from_call_response(result: &Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = match result.get("content") {
            Some(Value::Array(blocks)) => text_of_blocks(blocks)
                .map(Value::String)
                .unwrap_or_else(|| Value::Array(blocks.clone())),
            Some(other) => other.clone(),
            None => result.get("structuredContent").cloned().unwrap_or(Value::Null),
        };

        if is_error {
            let message = match &content {
                Value::String(text) if !text.trim().is_empty() => text.clone(),
                Value::Null => "tool reported an error".to_string(),
                other => other.to_string(),
            };
            Self {
                success: false,
                content,
                error: Some(message),
            }
        } else {
            Self {
                success: true,
                content,
                error: None,
            }
        }
    }

    /// Text fed back to the model.
    pub fn render(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn text_of_blocks(blocks: &[Value]) -> Option<String> {
    if blocks.is_empty() {
        return Some(String::new());
    }
    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("text") {
            return None;
        }
        parts.push(block.get("text").and_then(Value::as_str)?);
    }
    Some(parts.join("\n"))
}
