use super::events::{AgentEvent, EventBus};
use super::models::{AgentOptions, AgentOutcome, AgentStep, FailureReason, RunStatus};
use super::parser::{ParsedTurn, ToolUseBlock, parse_turn};
use super::session::{AgentSession, CancelHandle, RunState};
use crate::application::prompt::{PromptCompiler, PromptLimits};
use crate::application::tooling::{
    CatalogSnapshot, ConfirmationRefused, McpError, ToolServerInterface,
};
use crate::constants::COMPLETION_TOOL;
use crate::model::{ModelProvider, ModelRequest};
use crate::types::ChatMessage;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name echoed back when a block has no readable name.
const UNNAMED_TOOL: &str = "unknown";

/// Drives one model through the tool-use loop until it completes, hits a cap or
/// is cancelled. Runs are independent; the same agent may drive several at once.
pub struct Agent<P: ModelProvider> {
    provider: Arc<P>,
    tools: Arc<dyn ToolServerInterface>,
    compiler: PromptCompiler,
    events: EventBus,
}

/// The outcome of one tool-call round, already reduced to text for the model.
struct ToolRound {
    /// As the model wrote it; echoed back verbatim.
    name: String,
    /// Catalog id once the name resolved; events carry this one.
    id: String,
    server: Option<String>,
    arguments: Value,
    output: Result<String, McpError>,
}

impl ToolRound {
    fn rejected(name: &str, error: McpError) -> Self {
        Self {
            name: name.to_string(),
            id: name.to_string(),
            server: None,
            arguments: Value::Object(Map::new()),
            output: Err(error),
        }
    }

    fn echo(&self) -> String {
        let result = match &self.output {
            Ok(text) => text.clone(),
            Err(err) => format!("Error: {err}"),
        };
        format!(
            "<tool_use_result>\n  <name>{}</name>\n  <result>{}</result>\n</tool_use_result>",
            self.name, result
        )
    }

    fn step(&self, iteration: usize) -> AgentStep {
        AgentStep {
            iteration,
            tool: self.name.clone(),
            server: self.server.clone(),
            arguments: self.arguments.clone(),
            success: self.output.is_ok(),
            output: match &self.output {
                Ok(text) => text.clone(),
                Err(err) => err.to_string(),
            },
        }
    }
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(provider: Arc<P>, tools: Arc<dyn ToolServerInterface>) -> Self {
        Self {
            provider,
            tools,
            compiler: PromptCompiler::default(),
            events: EventBus::new(),
        }
    }

    /// Style and working directory come from `compiler`; limits always follow the run options.
    pub fn with_compiler(mut self, compiler: PromptCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn run(
        &self,
        task: impl Into<String>,
        snapshot: Arc<CatalogSnapshot>,
        options: AgentOptions,
        cancel: &CancelHandle,
    ) -> AgentOutcome {
        let run_id = Uuid::new_v4();
        let limits = PromptLimits {
            max_iterations: options.max_iterations,
            max_consecutive_errors: options.max_consecutive_errors,
        };
        let system_prompt = self
            .compiler
            .clone()
            .with_limits(limits)
            .compile(&options.system_prompt, &snapshot);

        let mut session = AgentSession::new(options.max_iterations, options.max_consecutive_errors);
        let mut turns = options.history;
        turns.push(ChatMessage::user(task));
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        session.start();
        info!(
            %run_id,
            tools = snapshot.tools().len(),
            agentic = snapshot.has_file_editor_tools(),
            max_iterations = session.max_iterations(),
            "Agent run started"
        );

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Aborted;
            }
            if session.iteration_cap_reached() {
                warn!(%run_id, iterations = session.iteration_count(), "Iteration cap reached");
                break RunStatus::Failed(FailureReason::IterationCap {
                    limit: session.max_iterations(),
                });
            }

            debug!(%run_id, turns = turns.len(), "Submitting turn to model provider");
            let request = ModelRequest::new(system_prompt.clone(), turns.clone());
            let text = match self.provider.chat(request).await {
                Ok(response) => response.message.content,
                Err(err) => {
                    warn!(%run_id, error = %err, "Model request failed");
                    break RunStatus::Failed(FailureReason::Model {
                        message: err.to_string(),
                    });
                }
            };

            if cancel.is_cancelled() {
                turns.push(ChatMessage::assistant(text));
                break RunStatus::Aborted;
            }

            let round = match parse_turn(&text) {
                ParsedTurn::Answer => {
                    let answer = text.trim().to_string();
                    turns.push(ChatMessage::assistant(text));
                    break RunStatus::Completed {
                        answer,
                        command: None,
                    };
                }
                ParsedTurn::Malformed { reason, ignored } => {
                    self.note_ignored(ignored, session.iteration_count() + 1, &mut warnings);
                    turns.push(ChatMessage::assistant(text.clone()));
                    ToolRound::rejected(UNNAMED_TOOL, McpError::tool_call(UNNAMED_TOOL, reason))
                }
                ParsedTurn::ToolUse { block, ignored } => {
                    self.note_ignored(ignored, session.iteration_count() + 1, &mut warnings);
                    turns.push(ChatMessage::assistant(&text[..block.end]));
                    if block.name == COMPLETION_TOOL {
                        match completion_arguments(&block) {
                            Ok((answer, command)) => {
                                break RunStatus::Completed { answer, command };
                            }
                            Err(err) => ToolRound::rejected(&block.name, err),
                        }
                    } else {
                        self.dispatch(&snapshot, &block, options.tool_timeout).await
                    }
                }
            };

            session.begin_iteration();
            turns.push(ChatMessage::user(round.echo()));
            steps.push(round.step(session.iteration_count()));

            match &round.output {
                Ok(result) => {
                    session.record_success();
                    self.events.publish(AgentEvent::ToolCallSucceeded {
                        name: round.id.clone(),
                        result: result.clone(),
                    });
                }
                Err(err) => {
                    let event = match ConfirmationRefused::from_error(err) {
                        Some(refused) => AgentEvent::ToolCallRejected {
                            name: round.id.clone(),
                            reason: refused.to_string(),
                        },
                        None => AgentEvent::ToolCallFailed {
                            name: round.id.clone(),
                            error: err.to_string(),
                        },
                    };
                    self.events.publish(event);
                    if session.record_failure() {
                        warn!(
                            %run_id,
                            consecutive = session.consecutive_error_count(),
                            "Consecutive error limit reached"
                        );
                        break RunStatus::Failed(FailureReason::ConsecutiveErrors {
                            limit: session.max_consecutive_errors(),
                        });
                    }
                }
            }
        };

        match &status {
            RunStatus::Completed { answer, .. } => {
                session.finish(RunState::Completed);
                info!(%run_id, iterations = session.iteration_count(), "Agent run completed");
                self.events.publish(AgentEvent::RunCompleted {
                    summary: answer.clone(),
                });
            }
            RunStatus::Failed(reason) => {
                session.finish(RunState::Failed);
                warn!(%run_id, %reason, "Agent run failed");
                self.events.publish(AgentEvent::RunFailed {
                    reason: reason.clone(),
                });
            }
            RunStatus::Aborted => {
                session.finish(RunState::Aborted);
                info!(%run_id, "Agent run aborted");
                self.events.publish(AgentEvent::RunAborted);
            }
        }

        AgentOutcome {
            run_id,
            status,
            turns,
            steps,
            warnings,
            iterations: session.iteration_count(),
        }
    }

    async fn dispatch(
        &self,
        snapshot: &CatalogSnapshot,
        block: &ToolUseBlock,
        timeout: Option<Duration>,
    ) -> ToolRound {
        let Some(tool) = snapshot.resolve(&block.name) else {
            warn!(tool = %block.name, "Model requested an unknown tool");
            return ToolRound::rejected(&block.name, McpError::tool_not_found(&block.name));
        };
        let arguments = match block.arguments() {
            Ok(arguments) => arguments,
            Err(reason) => {
                warn!(tool = %tool.id, %reason, "Rejected tool arguments");
                let mut round = ToolRound::rejected(
                    &block.name,
                    McpError::tool_call(&tool.name, reason).with_server(&tool.server_name),
                );
                round.id = tool.id.clone();
                round.server = Some(tool.server_name.clone());
                return round;
            }
        };

        let arguments_value = Value::Object(arguments.clone());
        self.events.publish(AgentEvent::ToolCallStarted {
            name: tool.id.clone(),
            arguments: arguments_value.clone(),
        });
        info!(tool = %tool.id, server = %tool.server_name, "Executing tool call");

        let output = match self.tools.invoke_tool(tool, arguments, timeout).await {
            Ok(result) if result.success => Ok(result.render()),
            Ok(result) => {
                let message = result.error.clone().unwrap_or_else(|| result.render());
                Err(McpError::tool_call(&tool.name, message).with_server(&tool.server_name))
            }
            Err(err) => Err(err),
        };

        ToolRound {
            name: block.name.clone(),
            id: tool.id.clone(),
            server: Some(tool.server_name.clone()),
            arguments: arguments_value,
            output,
        }
    }

    fn note_ignored(&self, ignored: usize, iteration: usize, warnings: &mut Vec<String>) {
        if ignored == 0 {
            return;
        }
        let warning = format!(
            "turn {iteration}: model emitted {} tool_use blocks; only the first was executed",
            ignored + 1
        );
        warn!(iteration, ignored, "Ignoring extra tool_use blocks");
        warnings.push(warning);
    }
}

/// `attempt_completion` carries a required `result` and an optional `command`.
fn completion_arguments(block: &ToolUseBlock) -> Result<(String, Option<String>), McpError> {
    let arguments = block
        .arguments()
        .map_err(|reason| McpError::tool_call(COMPLETION_TOOL, reason))?;
    let result = arguments
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            McpError::tool_call(
                COMPLETION_TOOL,
                "attempt_completion requires a string `result` argument",
            )
        })?
        .to_string();
    let command = arguments
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string);
    Ok((result, command))
}
