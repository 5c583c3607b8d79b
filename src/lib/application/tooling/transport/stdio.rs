use super::McpTransport;
use super::rpc::{self, PendingRequests, RpcChannel};
use crate::application::tooling::error::McpError;
use crate::application::tooling::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::{ServerConfig, TransportKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Child process speaking newline-delimited JSON-RPC on stdin/stdout.
#[derive(Clone)]
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    server: ServerConfig,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: PendingRequests,
    /// Bumped on every spawn; a reader only tears down the child it was started for.
    generation: AtomicU64,
}

impl StdioTransport {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            inner: Arc::new(StdioInner {
                server,
                child: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                pending: PendingRequests::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.inner.server.timeout())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> Result<(), McpError> {
        self.inner.ensure_running().await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.inner.shutdown(None).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), McpError> {
        rpc::ping(self.inner.as_ref(), self.default_timeout()).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        rpc::list_tools(self.inner.as_ref(), self.default_timeout()).await
    }

    async fn call_tool(
        &self,
        request: ToolCallRequest,
        meta: Option<Value>,
        options: CallToolOptions,
    ) -> Result<ToolCallResult, McpError> {
        let options = CallToolOptions {
            timeout: options.timeout.or(self.default_timeout()),
        };
        rpc::call_tool(self.inner.as_ref(), request, meta, options).await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        rpc::list_prompts(self.inner.as_ref(), self.default_timeout()).await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        rpc::list_resources(self.inner.as_ref(), self.default_timeout()).await
    }
}

impl StdioInner {
    async fn ensure_running(self: &Arc<Self>) -> Result<(), McpError> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let program = self.server.command.as_ref().ok_or_else(|| {
            McpError::initialization_failed("stdio transport requires a command")
                .with_server(&self.server.name)
        })?;
        let mut command = Command::new(program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.server.workdir {
            command.current_dir(dir);
        }
        command.args(&self.server.args);
        for (key, value) in &self.server.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| {
            McpError::connection(format!(
                "failed to spawn MCP server '{}': {source}",
                self.server.name
            ))
            .with_server(&self.server.name)
            .with_cause(source)
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.transport_error("failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.transport_error("failed to capture server stdout"))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().await = Some(BufWriter::new(stdin));
        *slot = Some(child);
        drop(slot);
        info!(server = %self.server.name, generation, "Spawned stdio MCP server");

        let reader_self = Arc::clone(self);
        tokio::spawn(async move {
            reader_self.reader_loop(stdout, generation).await;
        });

        match rpc::initialize(self.as_ref(), Some(self.server.timeout())).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.shutdown(Some(generation)).await;
                Err(err)
            }
        }
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout, generation: u64) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('\u{1b}') {
                debug!(
                    server = %self.server.name,
                    line = trimmed,
                    "skipping non-JSON ANSI log line from MCP server"
                );
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    if let Err(err) = self.process_inbound_message(value).await {
                        warn!(
                            server = %self.server.name,
                            %err,
                            "failed to process message from MCP server"
                        );
                    }
                }
                Err(source) => {
                    warn!(
                        server = %self.server.name,
                        line = trimmed,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                }
            }
        }

        debug!(server = %self.server.name, generation, "MCP server stdout closed");
        self.shutdown(Some(generation)).await;
    }

    async fn process_inbound_message(&self, value: Value) -> Result<(), McpError> {
        let id = value.get("id").cloned();
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        match (id, method) {
            (Some(id), Some(method)) => self.handle_server_request(id, &method).await,
            (Some(_), None) => {
                self.pending
                    .resolve(value, &self.server.name, TransportKind::Stdio)
                    .await;
                Ok(())
            }
            (None, Some(method)) => {
                debug!(server = %self.server.name, method = %method, "received notification from server");
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    async fn handle_server_request(&self, id: Value, method: &str) -> Result<(), McpError> {
        let reply = match method {
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            other => {
                warn!(
                    server = %self.server.name,
                    method = other,
                    "server sent unsupported request"
                );
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": rpc::METHOD_NOT_FOUND,
                        "message": format!("client does not implement method '{other}'"),
                    }
                })
            }
        };
        self.write_message(&reply).await
    }

    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let mut encoded = serde_json::to_string(message).map_err(|source| {
            self.transport_error(format!("failed to encode message: {source}"))
        })?;
        encoded.push('\n');

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| {
            McpError::connection(format!("MCP server '{}' is not running", self.server.name))
                .with_server(&self.server.name)
        })?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(|source| self.transport_error(source.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|source| self.transport_error(source.to_string()))?;
        Ok(())
    }

    /// Stop the child and fail every pending request. With `expected` set, nothing
    /// happens unless that generation is still the running one.
    async fn shutdown(&self, expected: Option<u64>) {
        let running = {
            let mut slot = self.child.lock().await;
            let current = self.generation.load(Ordering::SeqCst);
            if expected.is_some_and(|generation| generation != current) {
                debug!(
                    server = %self.server.name,
                    current,
                    "ignoring shutdown from a previous server process"
                );
                return;
            }
            self.writer.lock().await.take();
            slot.take()
        };
        if let Some(mut child) = running {
            if let Err(err) = child.kill().await {
                debug!(
                    server = %self.server.name,
                    %err,
                    "failed to kill MCP server process (may have already exited)"
                );
            }
            let _ = child.wait().await;
            info!(server = %self.server.name, "Stopped stdio MCP server");
        }

        let server = self.server.name.clone();
        self.pending
            .fail_all(|| {
                McpError::connection_closed(format!("MCP server '{server}' terminated"))
                    .with_server(server.clone())
            })
            .await;
    }

    fn transport_error(&self, message: impl Into<String>) -> McpError {
        McpError::transport(TransportKind::Stdio.as_str(), message).with_server(&self.server.name)
    }
}

#[async_trait]
impl RpcChannel for StdioInner {
    fn server(&self) -> &str {
        &self.server.name
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = self.pending.next_id();
        let rx = self.pending.register(&id).await;
        if let Err(err) = self
            .write_message(&rpc::request_payload(&id, method, params))
            .await
        {
            self.pending.forget(&id).await;
            return Err(err);
        }
        self.pending
            .wait(&id, rx, timeout, &self.server.name, method)
            .await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_message(&rpc::notification_payload(method, params))
            .await
    }
}
