//! Aggregated view over the tools of every connected server.
//!
//! Ids are the plain tool name when it is unique across servers. Colliding names
//! are prefixed with the sanitized server name and `__`. Ids never exceed
//! [`TOOL_NAME_MAX_LENGTH`] characters and stay stable for the lifetime of a
//! snapshot.

use super::classify::ErrorClassifier;
use super::confirmation::ToolConfirmation;
use super::error::McpError;
use super::interface::ToolServerInterface;
use super::pool::ServerPool;
use super::types::{CallToolOptions, ToolCallRequest, ToolCallResult, ToolInfo};
use crate::constants::{AGENTIC_MODE_SERVER, FILE_EDITOR_TOOLS, TOOL_NAME_MAX_LENGTH};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server_name: String,
}

/// True when any tool is a file-editing primitive or comes from the file-editor server.
pub fn has_file_editor_tools(tools: &[ToolDescriptor]) -> bool {
    tools.iter().any(|tool| {
        FILE_EDITOR_TOOLS.contains(&tool.name.as_str()) || tool.server_name == AGENTIC_MODE_SERVER
    })
}

/// Immutable tool set taken at one point in time.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    tools: Vec<ToolDescriptor>,
    file_editor: bool,
}

impl CatalogSnapshot {
    /// Build from `(server, tools)` pairs. Order is kept: servers first, then each
    /// server's listing order.
    pub fn from_server_tools<'a, I>(servers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ToolInfo])>,
    {
        let servers: Vec<(&str, &[ToolInfo])> = servers.into_iter().collect();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for (_, tools) in &servers {
            for tool in *tools {
                *occurrences.entry(tool.name.as_str()).or_default() += 1;
            }
        }

        let mut taken = HashSet::new();
        let mut descriptors = Vec::new();
        for (server, tools) in &servers {
            for tool in *tools {
                let base = if occurrences.get(tool.name.as_str()).copied().unwrap_or(0) > 1 {
                    format!("{}__{}", sanitize_server_name(server), sanitize(&tool.name))
                } else {
                    sanitize(&tool.name)
                };
                let id = unique_id(truncate(base), &mut taken);
                descriptors.push(ToolDescriptor {
                    id,
                    name: tool.name.clone(),
                    description: tool.description.clone().unwrap_or_default(),
                    input_schema: tool.input_schema.clone(),
                    server_name: (*server).to_string(),
                });
            }
        }

        let file_editor = has_file_editor_tools(&descriptors);
        Self {
            tools: descriptors,
            file_editor,
        }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn has_file_editor_tools(&self) -> bool {
        self.file_editor
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Find a tool by id, by unambiguous plain name, or by the normalized form of
    /// either.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        let name = name.trim();
        if let Some(tool) = self.tools.iter().find(|tool| tool.id == name) {
            return Some(tool);
        }
        if let Some(tool) = single(self.tools.iter().filter(|tool| tool.name == name)) {
            return Some(tool);
        }
        let wanted = normalize_tool_name(name);
        single(
            self.tools.iter().filter(|tool| {
                normalize_tool_name(&tool.id) == wanted || normalize_tool_name(&tool.name) == wanted
            }),
        )
    }
}

fn single<'a>(mut matches: impl Iterator<Item = &'a ToolDescriptor>) -> Option<&'a ToolDescriptor> {
    let first = matches.next()?;
    match matches.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_server_name(server: &str) -> String {
    sanitize(server).trim_start_matches('_').to_string()
}

fn truncate(mut id: String) -> String {
    id.truncate(TOOL_NAME_MAX_LENGTH);
    id
}

fn unique_id(base: String, taken: &mut HashSet<String>) -> String {
    let mut id = base.clone();
    let mut suffix = 2;
    while taken.contains(&id) {
        let tail = format!("_{suffix}");
        let mut head = base.clone();
        head.truncate(TOOL_NAME_MAX_LENGTH.saturating_sub(tail.len()));
        id = format!("{head}{tail}");
        suffix += 1;
    }
    taken.insert(id.clone());
    id
}

/// Names as some clients rewrite them before showing them to a model: leading
/// digits get an `mcp_` prefix, anything outside `[A-Za-z0-9_.-]` becomes `_`,
/// the result is capped at 64 characters and must start with a letter or `_`.
pub fn normalize_tool_name(name: &str) -> String {
    let mut converted = if name.starts_with(|ch: char| ch.is_ascii_digit()) {
        format!("mcp_{name}")
    } else {
        name.to_string()
    };
    converted = converted
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    converted.truncate(64);
    if !converted.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_') {
        converted = format!("tool_{converted}");
    }
    converted
}

/// Live catalog over a [`ServerPool`]. Each run works on the snapshot it took at start.
pub struct ToolCatalog {
    pool: Arc<ServerPool>,
    classifier: ErrorClassifier,
    confirmation: Option<Arc<dyn ToolConfirmation>>,
}

impl ToolCatalog {
    pub fn new(pool: Arc<ServerPool>, classifier: ErrorClassifier) -> Self {
        Self {
            pool,
            classifier,
            confirmation: None,
        }
    }

    /// Gate every call through `confirmation` before it reaches a server.
    pub fn with_confirmation(mut self, confirmation: Arc<dyn ToolConfirmation>) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Tools of the servers that are connected right now.
    pub async fn snapshot(&self) -> Arc<CatalogSnapshot> {
        let mut listed: Vec<(String, Arc<Vec<ToolInfo>>)> = Vec::new();
        for connection in self.pool.connections() {
            let tools = connection.tools().await;
            if !tools.is_empty() {
                listed.push((connection.name().to_string(), tools));
            }
        }
        let snapshot = CatalogSnapshot::from_server_tools(
            listed
                .iter()
                .map(|(server, tools)| (server.as_str(), tools.as_slice())),
        );
        debug!(
            tools = snapshot.tools().len(),
            agentic = snapshot.has_file_editor_tools(),
            "Built tool catalog snapshot"
        );
        Arc::new(snapshot)
    }
}

#[async_trait]
impl ToolServerInterface for ToolCatalog {
    async fn invoke_tool(
        &self,
        tool: &ToolDescriptor,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, McpError> {
        let server = tool.server_name.as_str();
        if let Some(gate) = &self.confirmation
            && let Some(request) = gate.request_for(tool, &arguments)
            && let Err(refused) = gate.confirm(request).await
        {
            warn!(server, tool = %tool.id, reason = %refused, "Tool call not confirmed");
            return Err(refused.into_error(tool));
        }
        let outcome = match self.pool.get(server) {
            Ok(connection) => {
                connection
                    .call_tool(
                        ToolCallRequest::new(&tool.name, arguments),
                        CallToolOptions { timeout },
                    )
                    .await
            }
            Err(err) => Err(err),
        };
        outcome.map_err(|err| {
            let mut classified = self.classifier.classify(err, Some(server));
            if classified.server.is_none() {
                classified = classified.with_server(server);
            }
            warn!(server, tool = %tool.id, error = %classified, "Tool call failed");
            classified
        })
    }
}
