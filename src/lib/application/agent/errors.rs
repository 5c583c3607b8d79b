use super::models::FailureReason;
use crate::application::tooling::McpError;
use crate::config::ConfigError;
use crate::model::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tool(#[from] McpError),
    #[error("agent run failed: {0}")]
    Failed(FailureReason),
    #[error("agent run aborted")]
    Aborted,
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Config(err) => format!("Configuration problem: {err}"),
            AgentError::Model(err) => err.user_message(),
            AgentError::Tool(err) => format!("{} ({})", err.message, err.code()),
            AgentError::Failed(reason) => reason.user_message(),
            AgentError::Aborted => "The run was stopped before it finished.".to_string(),
        }
    }
}
