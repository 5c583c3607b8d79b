use super::errors::AgentError;
use crate::config::AgentConfig;
use crate::constants::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_ITERATIONS};
use crate::types::ChatMessage;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// User-authored system prompt, appended last to the compiled prompt
    pub system_prompt: String,
    /// Prior turns of the conversation, oldest first
    pub history: Vec<ChatMessage>,
    pub max_iterations: usize,
    pub max_consecutive_errors: usize,
    /// Bound for each tool call; `None` leaves it to the server's own timeout
    pub tool_timeout: Option<Duration>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            history: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            tool_timeout: None,
        }
    }
}

impl AgentOptions {
    pub fn from_config(config: &AgentConfig, system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            max_iterations: config.max_iterations,
            max_consecutive_errors: config.max_consecutive_errors,
            tool_timeout: config.tool_timeout_seconds.map(Duration::from_secs),
        }
    }
}

/// Why a run ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    IterationCap { limit: usize },
    ConsecutiveErrors { limit: usize },
    Model { message: String },
}

impl FailureReason {
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::IterationCap { limit } => format!(
                "The agent stopped after {limit} tool calls without finishing the task (iteration cap reached)."
            ),
            FailureReason::ConsecutiveErrors { limit } => format!(
                "The agent stopped after {limit} failed tool calls in a row (consecutive error limit reached)."
            ),
            FailureReason::Model { message } => {
                format!("The model could not be reached: {message}")
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::IterationCap { .. } => f.write_str("iteration cap reached"),
            FailureReason::ConsecutiveErrors { .. } => {
                f.write_str("consecutive error limit reached")
            }
            FailureReason::Model { message } => write!(f, "model request failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed {
        answer: String,
        command: Option<String>,
    },
    Failed(FailureReason),
    Aborted,
}

/// One tool-call round as it was executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    pub iteration: usize,
    pub tool: String,
    pub server: Option<String>,
    pub arguments: Value,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Full conversation including tool results, kept even when the run failed
    pub turns: Vec<ChatMessage>,
    pub steps: Vec<AgentStep>,
    pub warnings: Vec<String>,
    pub iterations: usize,
}

impl AgentOutcome {
    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Completed { answer, .. } => Some(answer),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<String, AgentError> {
        match self.status {
            RunStatus::Completed { answer, .. } => Ok(answer),
            RunStatus::Failed(reason) => Err(AgentError::Failed(reason)),
            RunStatus::Aborted => Err(AgentError::Aborted),
        }
    }
}
