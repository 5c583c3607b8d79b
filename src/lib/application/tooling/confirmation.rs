//! Approval gate for sensitive tool calls.
//!
//! Registered tools only run once a person approves the call. Requests travel to
//! the UI over a channel; no answer within the timeout counts as a rejection.

use super::catalog::ToolDescriptor;
use super::error::McpError;
use crate::constants::CONFIRMATION_TIMEOUT_MS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// What the person is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub server: String,
    pub tool: String,
    pub arguments: Value,
    pub summary: String,
    pub risk: RiskLevel,
    pub requested_at: DateTime<Utc>,
}

/// Why a gated call did not run. Kept as the cause of the resulting tool error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmationRefused {
    #[error("the user rejected the call to '{tool}'")]
    Rejected { tool: String },
    #[error("no confirmation for '{tool}' within {timeout_ms} ms")]
    Expired { tool: String, timeout_ms: u64 },
}

impl ConfirmationRefused {
    /// The refusal behind a tool error, if that is why it failed.
    pub fn from_error(err: &McpError) -> Option<&Self> {
        err.cause
            .as_ref()
            .and_then(|cause| cause.downcast_ref::<Self>())
    }

    pub(crate) fn into_error(self, tool: &ToolDescriptor) -> McpError {
        McpError::tool_call(&tool.name, self.to_string())
            .with_server(&tool.server_name)
            .with_cause(self)
    }
}

/// Consulted by the catalog before every call.
#[async_trait]
pub trait ToolConfirmation: Send + Sync {
    /// `None` when the tool may run without asking.
    fn request_for(
        &self,
        tool: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Option<ConfirmationRequest>;

    async fn confirm(&self, request: ConfirmationRequest) -> Result<(), ConfirmationRefused>;
}

pub type SummaryBuilder = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

#[derive(Clone)]
struct ConfirmableTool {
    risk: RiskLevel,
    summary: Option<SummaryBuilder>,
}

/// A confirmation waiting for an answer. Dropping it rejects the call.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub request: ConfirmationRequest,
    responder: oneshot::Sender<bool>,
}

impl PendingConfirmation {
    pub fn approve(self) {
        let _ = self.responder.send(true);
    }

    pub fn reject(self) {
        let _ = self.responder.send(false);
    }
}

/// Registry of confirmable tools plus the channel their requests go out on.
///
/// Tools are matched by plain name, by catalog id or by `server::name`.
pub struct ChannelConfirmation {
    registry: HashMap<String, ConfirmableTool>,
    requests: mpsc::Sender<PendingConfirmation>,
    timeout: Duration,
}

impl ChannelConfirmation {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingConfirmation>) {
        let (requests, receiver) = mpsc::channel(buffer.max(1));
        let gate = Self {
            registry: HashMap::new(),
            requests,
            timeout: Duration::from_millis(CONFIRMATION_TIMEOUT_MS),
        };
        (gate, receiver)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(mut self, tool: impl Into<String>, risk: RiskLevel) -> Self {
        self.registry
            .insert(tool.into(), ConfirmableTool { risk, summary: None });
        self
    }

    pub fn register_with_summary(
        mut self,
        tool: impl Into<String>,
        risk: RiskLevel,
        summary: impl Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.registry.insert(
            tool.into(),
            ConfirmableTool {
                risk,
                summary: Some(Arc::new(summary)),
            },
        );
        self
    }

    pub fn unregister(&mut self, tool: &str) {
        self.registry.remove(tool);
    }

    pub fn needs_confirmation(&self, tool: &ToolDescriptor) -> bool {
        self.entry(tool).is_some()
    }

    fn entry(&self, tool: &ToolDescriptor) -> Option<&ConfirmableTool> {
        self.registry
            .get(&format!("{}::{}", tool.server_name, tool.name))
            .or_else(|| self.registry.get(&tool.id))
            .or_else(|| self.registry.get(&tool.name))
    }
}

#[async_trait]
impl ToolConfirmation for ChannelConfirmation {
    fn request_for(
        &self,
        tool: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Option<ConfirmationRequest> {
        let entry = self.entry(tool)?;
        let summary = match &entry.summary {
            Some(build) => build(arguments),
            None => format!("Run '{}' on '{}'", tool.name, tool.server_name),
        };
        Some(ConfirmationRequest {
            id: Uuid::new_v4(),
            server: tool.server_name.clone(),
            tool: tool.name.clone(),
            arguments: Value::Object(arguments.clone()),
            summary,
            risk: entry.risk,
            requested_at: Utc::now(),
        })
    }

    async fn confirm(&self, request: ConfirmationRequest) -> Result<(), ConfirmationRefused> {
        let tool = request.tool.clone();
        let id = request.id;
        let (responder, answer) = oneshot::channel();
        info!(%id, tool = %tool, risk = %request.risk, "Waiting for tool confirmation");

        let rejected = || ConfirmationRefused::Rejected { tool: tool.clone() };
        if self
            .requests
            .send(PendingConfirmation { request, responder })
            .await
            .is_err()
        {
            warn!(%id, tool = %tool, "Nobody is listening for confirmations, rejecting");
            return Err(rejected());
        }

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(true)) => {
                info!(%id, tool = %tool, "Tool call approved");
                Ok(())
            }
            Ok(Ok(false)) | Ok(Err(_)) => {
                info!(%id, tool = %tool, "Tool call rejected");
                Err(rejected())
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(%id, tool = %tool, timeout_ms, "Tool confirmation expired");
                Err(ConfirmationRefused::Expired {
                    tool: tool.clone(),
                    timeout_ms,
                })
            }
        }
    }
}
