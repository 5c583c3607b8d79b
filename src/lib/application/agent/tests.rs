use super::*;
use crate::application::tooling::{
    CatalogSnapshot, ConfirmationRefused, McpError, McpErrorKind, ToolCallResult, ToolDescriptor, ToolInfo,
    ToolServerInterface,
};
use crate::model::{ModelError, ModelProvider, ModelRequest, ModelResponse};
use crate::types::MessageRole;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct ScriptedProvider {
    responses: Arc<Mutex<Vec<String>>>,
    /// Returned once the script runs out
    repeat: Option<String>,
    fail: bool,
    recordings: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.into_iter().map(String::from).collect(),
            )),
            ..Self::default()
        }
    }

    fn repeating(response: &str) -> Self {
        Self {
            repeat: Some(response.to_string()),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.recordings.lock().await.push(request);
        if self.fail {
            return Err(ModelError::invalid_response("scripted", "no choices"));
        }
        let mut responses = self.responses.lock().await;
        let response = if responses.is_empty() {
            self.repeat.clone().unwrap_or_else(|| "out of script".to_string())
        } else {
            responses.remove(0)
        };
        Ok(ModelResponse::new(response))
    }
}

#[derive(Default)]
struct StubTools {
    calls: Mutex<Vec<(String, Value, Option<Duration>)>>,
    cancel_on_call: Option<CancelHandle>,
}

#[async_trait]
impl ToolServerInterface for StubTools {
    async fn invoke_tool(
        &self,
        tool: &ToolDescriptor,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<ToolCallResult, McpError> {
        self.calls
            .lock()
            .await
            .push((tool.id.clone(), Value::Object(arguments), timeout));
        if let Some(cancel) = &self.cancel_on_call {
            cancel.cancel();
        }
        match tool.name.as_str() {
            name if name.starts_with("fail") => {
                Err(McpError::tool_call(name, "boom").with_server(&tool.server_name))
            }
            "reports_error" => Ok(ToolCallResult::failure("bad input")),
            "guarded" => Err(ConfirmationRefused::Rejected {
                tool: "guarded".into(),
            }
            .into_error(tool)),
            name => Ok(ToolCallResult::text(format!("{name} result"))),
        }
    }
}

impl StubTools {
    async fn called(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

fn info(name: &str) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: json!({ "type": "object" }),
    }
}

fn snapshot(names: &[&str]) -> Arc<CatalogSnapshot> {
    let tools: Vec<ToolInfo> = names.iter().map(|name| info(name)).collect();
    Arc::new(CatalogSnapshot::from_server_tools([("utilities", tools.as_slice())]))
}

fn call(name: &str, arguments: &str) -> String {
    format!("<tool_use>\n  <name>{name}</name>\n  <arguments>{arguments}</arguments>\n</tool_use>")
}

fn agent(provider: &ScriptedProvider, tools: Arc<StubTools>) -> Agent<ScriptedProvider> {
    Agent::new(Arc::new(provider.clone()), tools)
}

#[tokio::test]
async fn direct_answer_completes_without_tools() {
    let provider = ScriptedProvider::new(vec!["Paris."]);
    let tools = Arc::new(StubTools::default());
    let options = AgentOptions {
        system_prompt: "be brief".into(),
        ..AgentOptions::default()
    };

    let outcome = agent(&provider, tools.clone())
        .run("capital of France?", snapshot(&[]), options, &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("Paris."));
    assert!(outcome.steps.is_empty());
    assert_eq!(outcome.iterations, 0);

    let requests = provider.requests().await;
    assert_eq!(requests.len(), 1);
    // no tools means the user prompt goes out untouched
    assert_eq!(requests[0].system_prompt, "be brief");
    assert_eq!(requests[0].messages, vec![crate::types::ChatMessage::user("capital of France?")]);
}

#[tokio::test]
async fn tool_result_is_echoed_back_to_the_model() {
    let provider = ScriptedProvider::new(vec![&call("search", r#"{"query": "rust"}"#), "Found it."]);
    let tools = Arc::new(StubTools::default());

    let outcome = agent(&provider, tools.clone())
        .run("look up rust", snapshot(&["search"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("Found it."));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].arguments, json!({ "query": "rust" }));
    assert_eq!(outcome.steps[0].server.as_deref(), Some("utilities"));

    let requests = provider.requests().await;
    let last = requests[1].messages.last().expect("echo turn");
    assert_eq!(last.role, MessageRole::User);
    assert_eq!(
        last.content,
        "<tool_use_result>\n  <name>search</name>\n  <result>search result</result>\n</tool_use_result>"
    );
    assert!(requests[1].system_prompt.contains("<name>search</name>"));
}

#[tokio::test]
async fn only_the_first_tool_use_block_runs() {
    let reply = format!("{}\n{}", call("search", "{}"), call("fetch", "{}"));
    let provider = ScriptedProvider::new(vec![&reply, "done"]);
    let tools = Arc::new(StubTools::default());

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["search", "fetch"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(tools.called().await, vec!["search".to_string()]);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("only the first"));
    // the assistant turn stops after the honoured block
    let assistant = &outcome.turns[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert!(!assistant.content.contains("fetch"));
}

#[tokio::test]
async fn consecutive_failures_fail_the_run() {
    let provider = ScriptedProvider::repeating(&call("fail_always", "{}"));
    let tools = Arc::new(StubTools::default());
    let options = AgentOptions {
        max_consecutive_errors: 3,
        ..AgentOptions::default()
    };

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["fail_always"]), options, &CancelHandle::new())
        .await;

    let RunStatus::Failed(reason) = &outcome.status else {
        panic!("expected failure, got {:?}", outcome.status);
    };
    assert_eq!(*reason, FailureReason::ConsecutiveErrors { limit: 3 });
    assert_eq!(reason.to_string(), "consecutive error limit reached");
    assert_eq!(provider.requests().await.len(), 3);
    assert_eq!(outcome.iterations, 3);
    // partial progress stays in the conversation
    assert!(outcome.turns.iter().any(|turn| turn.content.contains("<result>Error: boom</result>")));
}

#[tokio::test]
async fn attempt_completion_ends_the_run_immediately() {
    let provider = ScriptedProvider::new(vec![
        r#"<tool_use><name>attempt_completion</name><arguments>{"result":"done"}</arguments></tool_use>"#,
        "never sent",
    ]);
    let tools = Arc::new(StubTools::default());

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["write_to_file"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            answer: "done".into(),
            command: None
        }
    );
    assert_eq!(provider.requests().await.len(), 1);
    assert!(tools.called().await.is_empty());
    assert_eq!(outcome.iterations, 0);
}

#[tokio::test]
async fn attempt_completion_keeps_the_suggested_command() {
    let provider = ScriptedProvider::new(vec![&call(
        "attempt_completion",
        r#"{"result": "Built it", "command": "cargo run"}"#,
    )]);
    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&[]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(
        outcome.status,
        RunStatus::Completed {
            answer: "Built it".into(),
            command: Some("cargo run".into())
        }
    );
}

#[tokio::test]
async fn completion_without_result_is_a_recoverable_error() {
    let provider = ScriptedProvider::new(vec![
        &call("attempt_completion", r#"{"command": "ls"}"#),
        &call("attempt_completion", r#"{"result": "ok"}"#),
    ]);
    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&[]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("ok"));
    assert_eq!(outcome.steps.len(), 1);
    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0].output.contains("result"));
}

#[tokio::test]
async fn iteration_cap_stops_inconclusive_runs() {
    let provider = ScriptedProvider::repeating(&call("search", r#"{"query": "more"}"#));
    let tools = Arc::new(StubTools::default());
    let options = AgentOptions {
        max_iterations: 25,
        ..AgentOptions::default()
    };

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["search"]), options, &CancelHandle::new())
        .await;

    assert_eq!(
        outcome.status,
        RunStatus::Failed(FailureReason::IterationCap { limit: 25 })
    );
    assert_eq!(
        FailureReason::IterationCap { limit: 25 }.to_string(),
        "iteration cap reached"
    );
    assert_eq!(outcome.iterations, 25);
    assert_eq!(tools.called().await.len(), 25);
    assert_eq!(provider.requests().await.len(), 25);
    assert!(outcome.steps.iter().all(|step| step.success));
}

#[tokio::test]
async fn malformed_arguments_count_as_errors_and_success_resets() {
    let provider = ScriptedProvider::new(vec![
        &call("search", r#"{"query": "#),
        &call("search", r#"{"query": "ok"}"#),
        &call("search", "[1]"),
        &call("search", "not json"),
        "final answer",
    ]);
    let tools = Arc::new(StubTools::default());
    let options = AgentOptions {
        max_consecutive_errors: 3,
        ..AgentOptions::default()
    };

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["search"]), options, &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("final answer"));
    let pattern: Vec<bool> = outcome.steps.iter().map(|step| step.success).collect();
    assert_eq!(pattern, vec![false, true, false, false]);
    // only the well-formed call reached the tool
    assert_eq!(tools.called().await.len(), 1);
    assert!(outcome.steps[0].output.contains("invalid JSON"));
}

#[tokio::test]
async fn unknown_tools_are_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![&call("teleport", "{}"), "giving up"]);
    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&["search"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("giving up"));
    let requests = provider.requests().await;
    let echo = &requests[1].messages.last().expect("echo").content;
    assert!(echo.contains("<name>teleport</name>"));
    assert!(echo.contains("Error: tool 'teleport' is not available"));
}

#[tokio::test]
async fn tool_reported_errors_are_failures() {
    let provider = ScriptedProvider::new(vec![&call("reports_error", "{}"), "ok"]);
    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&["reports_error"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert!(!outcome.steps[0].success);
    let requests = provider.requests().await;
    let echo = &requests[1].messages.last().expect("echo").content;
    assert!(echo.contains("<result>Error: bad input</result>"));
}

#[tokio::test]
async fn model_failure_fails_the_run() {
    let provider = ScriptedProvider::failing();
    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&[]), AgentOptions::default(), &CancelHandle::new())
        .await;

    let RunStatus::Failed(FailureReason::Model { message }) = &outcome.status else {
        panic!("expected model failure");
    };
    assert!(message.contains("no choices"));
    assert!(matches!(outcome.into_result(), Err(AgentError::Failed(_))));
}

#[tokio::test]
async fn cancelled_before_start_makes_no_model_calls() {
    let provider = ScriptedProvider::new(vec!["never"]);
    let cancel = CancelHandle::new();
    cancel.cancel();

    let outcome = agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&[]), AgentOptions::default(), &cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert!(provider.requests().await.is_empty());
}

#[tokio::test]
async fn cancel_during_a_tool_call_aborts_after_it_finishes() {
    let cancel = CancelHandle::new();
    let provider = ScriptedProvider::repeating(&call("search", "{}"));
    let tools = Arc::new(StubTools {
        cancel_on_call: Some(cancel.clone()),
        ..StubTools::default()
    });

    let outcome = agent(&provider, tools.clone())
        .run("task", snapshot(&["search"]), AgentOptions::default(), &cancel)
        .await;

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.steps.len(), 1);
    assert!(outcome.steps[0].success);
    assert_eq!(provider.requests().await.len(), 1);
}

#[tokio::test]
async fn tool_timeout_is_forwarded() {
    let provider = ScriptedProvider::new(vec![&call("search", "{}"), "done"]);
    let tools = Arc::new(StubTools::default());
    let options = AgentOptions {
        tool_timeout: Some(Duration::from_secs(7)),
        ..AgentOptions::default()
    };

    agent(&provider, tools.clone())
        .run("task", snapshot(&["search"]), options, &CancelHandle::new())
        .await;

    let calls = tools.calls.lock().await;
    assert_eq!(calls[0].2, Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn events_follow_the_run() {
    let provider = ScriptedProvider::new(vec![&call("search", "{}"), &call("fail_once", "{}"), "done"]);
    let agent = agent(&provider, Arc::new(StubTools::default()));
    let mut events = agent.events().subscribe();

    agent
        .run("task", snapshot(&["search", "fail_once"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            AgentEvent::ToolCallStarted {
                name: "search".into(),
                arguments: json!({})
            },
            AgentEvent::ToolCallSucceeded {
                name: "search".into(),
                result: "search result".into()
            },
            AgentEvent::ToolCallStarted {
                name: "fail_once".into(),
                arguments: json!({})
            },
            AgentEvent::ToolCallFailed {
                name: "fail_once".into(),
                error: "boom".into()
            },
            AgentEvent::RunCompleted {
                summary: "done".into()
            },
        ]
    );
}

#[tokio::test]
async fn events_name_tools_by_catalog_id() {
    let provider = ScriptedProvider::new(vec![&call("read file", "{}"), &call("fail hard", "{}"), "done"]);
    let agent = agent(&provider, Arc::new(StubTools::default()));
    let mut events = agent.events().subscribe();

    let outcome = agent
        .run("task", snapshot(&["read file", "fail hard"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen[..4],
        [
            AgentEvent::ToolCallStarted {
                name: "read_file".into(),
                arguments: json!({})
            },
            AgentEvent::ToolCallSucceeded {
                name: "read_file".into(),
                result: "read file result".into()
            },
            AgentEvent::ToolCallStarted {
                name: "fail_hard".into(),
                arguments: json!({})
            },
            AgentEvent::ToolCallFailed {
                name: "fail_hard".into(),
                error: "boom".into()
            },
        ]
    );
    // the model still sees the name it wrote
    let requests = provider.requests().await;
    let echo = &requests[1].messages.last().expect("echo").content;
    assert!(echo.contains("<name>read file</name>"));
    assert_eq!(outcome.steps[0].tool, "read file");
}

#[tokio::test]
async fn refused_confirmations_are_their_own_event() {
    let provider = ScriptedProvider::new(vec![&call("guarded", "{}"), "fine, skipping"]);
    let agent = agent(&provider, Arc::new(StubTools::default()));
    let mut events = agent.events().subscribe();

    let outcome = agent
        .run("task", snapshot(&["guarded"]), AgentOptions::default(), &CancelHandle::new())
        .await;

    assert_eq!(outcome.answer(), Some("fine, skipping"));
    assert!(!outcome.steps[0].success);
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen[1],
        AgentEvent::ToolCallRejected {
            name: "guarded".into(),
            reason: "the user rejected the call to 'guarded'".into()
        }
    );
    let requests = provider.requests().await;
    let echo = &requests[1].messages.last().expect("echo").content;
    assert!(echo.contains("Error: the user rejected the call to 'guarded'"));
}

#[tokio::test]
async fn agentic_prompt_carries_run_limits() {
    let provider = ScriptedProvider::new(vec!["ok"]);
    let options = AgentOptions {
        max_iterations: 9,
        max_consecutive_errors: 2,
        ..AgentOptions::default()
    };

    agent(&provider, Arc::new(StubTools::default()))
        .run("task", snapshot(&["apply_diff"]), options, &CancelHandle::new())
        .await;

    let requests = provider.requests().await;
    let prompt = &requests[0].system_prompt;
    assert!(prompt.contains("## Agentic Mode"));
    assert!(prompt.contains("- Maximum iterations: 9 tool calls"));
    assert!(prompt.contains("- Consecutive error limit: 2 failures in a row"));
}

#[test]
fn error_kinds_surface_through_the_agent_error() {
    let err = AgentError::from(McpError::tool_not_found("x"));
    assert!(matches!(
        err,
        AgentError::Tool(McpError {
            kind: McpErrorKind::ToolNotFound { .. },
            ..
        })
    ));
}
