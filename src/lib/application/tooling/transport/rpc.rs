//! JSON-RPC plumbing shared by the stdio, SSE and streamable HTTP transports.

use crate::application::tooling::error::{McpError, McpErrorKind};
use crate::application::tooling::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::TransportKind;
use crate::constants::{CLIENT_NAME, CLIENT_VERSION, MCP_PROTOCOL_VERSION};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Error object returned by the remote side of a JSON-RPC exchange.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

pub(crate) fn request_payload(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub(crate) fn notification_payload(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub(crate) fn response_key(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

/// Split a response envelope into its `result`, or a classified error.
pub(crate) fn response_result(
    envelope: Value,
    server: &str,
    transport: TransportKind,
) -> Result<Value, McpError> {
    if let Some(error) = envelope.get("error") {
        let rpc = RpcError {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        };
        let classified = if rpc.code == INVALID_PARAMS {
            McpError::invalid_params(rpc.to_string())
        } else {
            McpError::transport(transport.as_str(), rpc.to_string())
        };
        return Err(classified.with_server(server).with_cause(rpc));
    }
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

pub(crate) fn rpc_error(err: &McpError) -> Option<&RpcError> {
    err.cause
        .as_ref()
        .and_then(|cause| cause.downcast_ref::<RpcError>())
}

pub(crate) fn is_method_not_found(err: &McpError) -> bool {
    rpc_error(err).is_some_and(|rpc| rpc.code == METHOD_NOT_FOUND)
}

type Responder = oneshot::Sender<Result<Value, McpError>>;

/// In-flight requests keyed by JSON-RPC id.
pub(crate) struct PendingRequests {
    inner: AsyncMutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            inner: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }

    pub(crate) async fn register(&self, id: &str) -> oneshot::Receiver<Result<Value, McpError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id.to_string(), tx);
        rx
    }

    pub(crate) async fn forget(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Route a response envelope to its waiter. Returns false for unknown ids.
    pub(crate) async fn resolve(
        &self,
        envelope: Value,
        server: &str,
        transport: TransportKind,
    ) -> bool {
        let Some(key) = envelope.get("id").and_then(response_key) else {
            return false;
        };
        let responder = self.inner.lock().await.remove(&key);
        match responder {
            Some(sender) => {
                let _ = sender.send(response_result(envelope, server, transport));
                true
            }
            None => {
                debug!(server, response_id = key, "received response for unknown request");
                false
            }
        }
    }

    pub(crate) async fn fail_all(&self, make_error: impl Fn() -> McpError) {
        let mut pending = self.inner.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(make_error()));
        }
    }

    /// Wait for the response to `id`, dropping the entry if `timeout` elapses first.
    pub(crate) async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<Result<Value, McpError>>,
        timeout: Option<Duration>,
        server: &str,
        method: &str,
    ) -> Result<Value, McpError> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget(id).await;
                    let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    return Err(McpError::timeout(
                        format!("request '{method}' timed out after {millis} ms"),
                        millis,
                    )
                    .with_server(server));
                }
            },
            None => rx.await,
        };
        match received {
            Ok(result) => result,
            Err(_) => Err(McpError::connection_closed(format!(
                "connection closed before '{method}' completed"
            ))
            .with_server(server)),
        }
    }
}

/// A request/notification channel to one server.
#[async_trait]
pub(crate) trait RpcChannel: Send + Sync {
    fn server(&self) -> &str;

    fn transport(&self) -> TransportKind;

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError>;
}

/// `initialize` followed by `notifications/initialized`.
pub(crate) async fn initialize<C>(channel: &C, timeout: Option<Duration>) -> Result<Value, McpError>
where
    C: RpcChannel + ?Sized,
{
    let params = json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION
        },
        "capabilities": {}
    });
    let result = channel
        .request("initialize", params, timeout)
        .await
        .map_err(|mut err| {
            if rpc_error(&err).is_some() {
                err.kind = McpErrorKind::InitializationFailed;
            }
            err
        })?;
    if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
        debug!(server = channel.server(), protocol = version, "MCP session initialised");
    }
    channel
        .notify("notifications/initialized", json!({}))
        .await?;
    Ok(result)
}

pub(crate) async fn ping<C>(channel: &C, timeout: Option<Duration>) -> Result<(), McpError>
where
    C: RpcChannel + ?Sized,
{
    match channel.request("ping", json!({}), timeout).await {
        Ok(_) => Ok(()),
        Err(err) if is_method_not_found(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

pub(crate) async fn list_tools<C>(
    channel: &C,
    timeout: Option<Duration>,
) -> Result<Vec<ToolInfo>, McpError>
where
    C: RpcChannel + ?Sized,
{
    list_paginated(channel, "tools/list", "tools", timeout).await
}

pub(crate) async fn list_prompts<C>(
    channel: &C,
    timeout: Option<Duration>,
) -> Result<Vec<PromptInfo>, McpError>
where
    C: RpcChannel + ?Sized,
{
    match list_paginated(channel, "prompts/list", "prompts", timeout).await {
        Err(err) if is_method_not_found(&err) => Ok(Vec::new()),
        other => other,
    }
}

pub(crate) async fn list_resources<C>(
    channel: &C,
    timeout: Option<Duration>,
) -> Result<Vec<ResourceInfo>, McpError>
where
    C: RpcChannel + ?Sized,
{
    match list_paginated(channel, "resources/list", "resources", timeout).await {
        Err(err) if is_method_not_found(&err) => Ok(Vec::new()),
        other => other,
    }
}

async fn list_paginated<C, T>(
    channel: &C,
    method: &str,
    field: &str,
    timeout: Option<Duration>,
) -> Result<Vec<T>, McpError>
where
    C: RpcChannel + ?Sized,
    T: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = match &cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        let page = channel.request(method, params, timeout).await?;
        if let Some(entries) = page.get(field).and_then(Value::as_array) {
            for entry in entries {
                match serde_json::from_value::<T>(entry.clone()) {
                    Ok(item) => items.push(item),
                    Err(err) => warn!(
                        server = channel.server(),
                        method,
                        %err,
                        "skipping malformed list entry"
                    ),
                }
            }
        }
        cursor = page
            .get("nextCursor")
            .and_then(Value::as_str)
            .filter(|next| !next.is_empty())
            .map(str::to_string);
        if cursor.is_none() {
            return Ok(items);
        }
    }
}

pub(crate) async fn call_tool<C>(
    channel: &C,
    request: ToolCallRequest,
    meta: Option<Value>,
    options: CallToolOptions,
) -> Result<ToolCallResult, McpError>
where
    C: RpcChannel + ?Sized,
{
    let ToolCallRequest { name, arguments } = request;
    let mut params = serde_json::Map::new();
    params.insert("name".to_string(), Value::String(name.clone()));
    params.insert("arguments".to_string(), Value::Object(arguments));
    if let Some(meta) = meta {
        params.insert("_meta".to_string(), meta);
    }
    let result = channel
        .request("tools/call", Value::Object(params), options.timeout)
        .await
        .map_err(|err| attribute_to_tool(err, &name))?;
    Ok(ToolCallResult::from_call_response(&result))
}

/// Remote and unknown failures during a call belong to the tool; timeouts and
/// connection failures keep their own category.
pub(crate) fn attribute_to_tool(mut err: McpError, tool: &str) -> McpError {
    if matches!(
        err.kind,
        McpErrorKind::Transport { .. } | McpErrorKind::Unknown
    ) {
        err.kind = McpErrorKind::ToolCall {
            tool: tool.to_string(),
        };
    }
    err
}
