//! Scripted transport shared by the tooling unit tests.

use super::error::McpError;
use super::transport::McpTransport;
use super::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::TransportKind;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) fn tool(name: &str) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: json!({ "type": "object" }),
    }
}

/// Succeeds on every call except tools whose name starts with `fail`.
pub(crate) struct FakeTransport {
    tools: Vec<ToolInfo>,
    failing_connects: AtomicUsize,
    retryable: bool,
    connect_delay: Duration,
    pub(crate) connects: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    pub(crate) calls: Mutex<Vec<ToolCallRequest>>,
}

impl FakeTransport {
    pub(crate) fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|name| tool(name)).collect(),
            failing_connects: AtomicUsize::new(0),
            retryable: true,
            connect_delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` connects, with a retryable or a fatal error.
    pub(crate) fn failing(mut self, times: usize, retryable: bool) -> Self {
        self.failing_connects = AtomicUsize::new(times);
        self.retryable = retryable;
        self
    }

    /// Every connect takes `delay` before it answers.
    pub(crate) fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn recorded_calls(&self) -> Vec<ToolCallRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl McpTransport for FakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InMemory
    }

    async fn connect(&self) -> Result<(), McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.retryable {
                McpError::connection("connection refused")
            } else {
                McpError::initialization_failed("handshake rejected")
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), McpError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        _meta: Option<Value>,
        _options: CallToolOptions,
    ) -> Result<ToolCallResult, McpError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if request.name.starts_with("fail") {
            return Err(McpError::tool_call(&request.name, "tool exploded"));
        }
        Ok(ToolCallResult::text(format!("{} ok", request.name)))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        Ok(Vec::new())
    }
}
