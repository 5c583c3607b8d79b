use super::McpTransport;
use super::rpc::{self, PendingRequests, RpcChannel};
use super::streamable_http::{MCP_JSON_CONTENT_TYPE, http_error};
use crate::application::tooling::classify::ErrorClassifier;
use crate::application::tooling::error::McpError;
use crate::application::tooling::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::{ServerConfig, TransportKind};
use crate::constants::MESSAGE_ENDPOINT_TIMEOUT_MS;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Legacy HTTP+SSE transport: responses arrive on a long-lived event stream,
/// requests are POSTed to the endpoint announced by the server's `endpoint` event.
#[derive(Clone)]
pub struct SseTransport {
    inner: Arc<SseInner>,
}

struct SseInner {
    server: ServerConfig,
    base: Url,
    http: reqwest::Client,
    pending: PendingRequests,
    message_endpoint: AsyncMutex<Option<Url>>,
    listener: AsyncMutex<Option<JoinHandle<()>>>,
    classifier: ErrorClassifier,
}

type EndpointSender = oneshot::Sender<Result<Url, McpError>>;

impl SseTransport {
    pub fn new(server: ServerConfig, classifier: ErrorClassifier) -> Result<Self, McpError> {
        let endpoint = server.endpoint.clone().ok_or_else(|| {
            McpError::initialization_failed("SSE transport requires an endpoint")
                .with_server(&server.name)
        })?;
        let base = Url::parse(&endpoint).map_err(|err| {
            McpError::initialization_failed(format!("invalid SSE endpoint '{endpoint}': {err}"))
                .with_server(&server.name)
        })?;
        Ok(Self {
            inner: Arc::new(SseInner {
                server,
                base,
                http: reqwest::Client::new(),
                pending: PendingRequests::new(),
                message_endpoint: AsyncMutex::new(None),
                listener: AsyncMutex::new(None),
                classifier,
            }),
        })
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.inner.server.timeout())
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self) -> Result<(), McpError> {
        let result = async {
            self.inner.open_stream().await?;
            rpc::initialize(self.inner.as_ref(), self.default_timeout()).await
        }
        .await;
        match result {
            Ok(_) => {
                info!(server = %self.inner.server.name, "Connected SSE MCP server");
                Ok(())
            }
            Err(err) => {
                self.inner.shutdown().await;
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.inner.shutdown().await;
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

impl SseInner {
    async fn open_stream(self: &Arc<Self>) -> Result<(), McpError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let mut request = self
            .http
            .get(self.base.clone())
            .header("Accept", "text/event-stream");
        for (name, value) in &self.server.headers {
            request = request.header(name, value);
        }
        let source = EventSource::new(request).map_err(|err| {
            McpError::transport(TransportKind::Sse.as_str(), err.to_string())
                .with_server(&self.server.name)
        })?;

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = Arc::clone(self);
        *listener = Some(tokio::spawn(async move {
            reader.listen(source, endpoint_tx).await;
        }));
        drop(listener);

        let wait = Duration::from_millis(MESSAGE_ENDPOINT_TIMEOUT_MS);
        let endpoint = match tokio::time::timeout(wait, endpoint_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(McpError::connection_closed(
                    "event stream closed before announcing a message endpoint",
                )
                .with_server(&self.server.name));
            }
            Err(_) => {
                return Err(McpError::timeout(
                    format!(
                        "timed out waiting for the SSE message endpoint after {MESSAGE_ENDPOINT_TIMEOUT_MS} ms"
                    ),
                    MESSAGE_ENDPOINT_TIMEOUT_MS,
                )
                .with_server(&self.server.name));
            }
        };
        debug!(server = %self.server.name, endpoint = %endpoint, "SSE message endpoint announced");
        *self.message_endpoint.lock().await = Some(endpoint);
        Ok(())
    }

    async fn listen(self: Arc<Self>, mut source: EventSource, endpoint_tx: EndpointSender) {
        let mut endpoint_tx = Some(endpoint_tx);
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => debug!(server = %self.server.name, "SSE stream opened"),
                Ok(Event::Message(message)) if message.event == "endpoint" => {
                    let resolved = resolve_message_endpoint(&self.base, &message.data)
                        .map_err(|err| err.with_server(&self.server.name));
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(resolved);
                    }
                }
                Ok(Event::Message(message)) => self.handle_message(&message.data).await,
                Err(err) => {
                    let classified = match err {
                        reqwest_eventsource::Error::Transport(source) => {
                            http_error(source, &self.server.name, &self.classifier)
                        }
                        reqwest_eventsource::Error::StreamEnded => {
                            McpError::connection_closed("SSE stream ended")
                                .with_server(&self.server.name)
                        }
                        other => self
                            .classifier
                            .classify(other.to_string(), Some(&self.server.name)),
                    };
                    warn!(server = %self.server.name, error = %classified, "SSE stream failed");
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(Err(classified));
                    }
                    break;
                }
            }
        }
        source.close();

        self.message_endpoint.lock().await.take();
        let server = self.server.name.clone();
        self.pending
            .fail_all(|| {
                McpError::connection_closed(format!("SSE stream for '{server}' closed"))
                    .with_server(server.clone())
            })
            .await;
    }

    async fn handle_message(&self, data: &str) {
        let envelope = match serde_json::from_str::<Value>(data.trim()) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(server = %self.server.name, %err, "received invalid JSON on SSE stream");
                return;
            }
        };
        if let Some(method) = envelope.get("method") {
            let method = method.as_str().unwrap_or_default();
            debug!(server = %self.server.name, method, "ignoring server-initiated message");
            return;
        }
        self.pending
            .resolve(envelope, &self.server.name, TransportKind::Sse)
            .await;
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.message_endpoint.lock().await.take();
        let server = self.server.name.clone();
        self.pending
            .fail_all(|| {
                McpError::connection_closed(format!("SSE transport for '{server}' closed"))
                    .with_server(server.clone())
            })
            .await;
    }
}

#[async_trait]
impl RpcChannel for SseInner {
    fn server(&self) -> &str {
        &self.server.name
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = self.pending.next_id();
        let rx = self.pending.register(&id).await;
        if let Err(err) = self.post(&rpc::request_payload(&id, method, params)).await {
            self.pending.forget(&id).await;
            return Err(err);
        }
        self.pending
            .wait(&id, rx, timeout, &self.server.name, method)
            .await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.post(&rpc::notification_payload(method, params)).await
    }
}

impl SseInner {
    async fn post(&self, payload: &Value) -> Result<(), McpError> {
        let endpoint = self.message_endpoint.lock().await.clone().ok_or_else(|| {
            McpError::connection(format!("SSE server '{}' is not connected", self.server.name))
                .with_server(&self.server.name)
        })?;
        let mut request = self
            .http
            .post(endpoint)
            .header("Content-Type", MCP_JSON_CONTENT_TYPE)
            .json(payload);
        for (name, value) in &self.server.headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| http_error(err, &self.server.name, &self.classifier))?;
        if !response.status().is_success() {
            return Err(McpError::transport(
                TransportKind::Sse.as_str(),
                format!("HTTP {} posting to message endpoint", response.status().as_u16()),
            )
            .with_server(&self.server.name));
        }
        Ok(())
    }
}

/// The `endpoint` event carries a URI relative to the stream URL.
fn resolve_message_endpoint(base: &Url, data: &str) -> Result<Url, McpError> {
    base.join(data.trim()).map_err(|err| {
        McpError::transport(
            TransportKind::Sse.as_str(),
            format!("invalid message endpoint '{}': {err}", data.trim()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_endpoint_resolves_against_stream_url() {
        let base = Url::parse("http://127.0.0.1:3000/sse").expect("url");
        let endpoint =
            resolve_message_endpoint(&base, " /messages?sessionId=abc ").expect("endpoint");
        assert_eq!(endpoint.as_str(), "http://127.0.0.1:3000/messages?sessionId=abc");
    }

    #[test]
    fn absolute_endpoint_is_kept() {
        let base = Url::parse("http://127.0.0.1:3000/sse").expect("url");
        let endpoint =
            resolve_message_endpoint(&base, "https://other.example/rpc").expect("endpoint");
        assert_eq!(endpoint.as_str(), "https://other.example/rpc");
    }

    #[test]
    fn invalid_base_url_fails_initialization() {
        let config = ServerConfig::new("remote", TransportKind::Sse).with_endpoint("not a url");
        let err = SseTransport::new(config, ErrorClassifier::default()).err().expect("invalid url");
        assert_eq!(err.kind, crate::application::tooling::error::McpErrorKind::InitializationFailed);
    }

    #[tokio::test]
    async fn stream_messages_resolve_only_matching_responses() {
        let config = ServerConfig::new("remote", TransportKind::Sse)
            .with_endpoint("http://127.0.0.1:9/sse");
        let transport = SseTransport::new(config, ErrorClassifier::default()).expect("transport");
        let inner = &transport.inner;
        let id = inner.pending.next_id();
        let rx = inner.pending.register(&id).await;

        inner
            .handle_message(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#)
            .await;
        inner
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
            .await;
        inner.handle_message("not json").await;
        inner
            .handle_message(&format!(
                r#"{{"jsonrpc":"2.0","id":"{id}","result":{{"tools":[]}}}}"#
            ))
            .await;

        let value = inner
            .pending
            .wait(&id, rx, Some(Duration::from_secs(1)), "remote", "tools/list")
            .await
            .expect("routed response");
        assert_eq!(value, serde_json::json!({ "tools": [] }));
    }

    #[tokio::test]
    async fn requests_before_connect_are_connection_errors() {
        let config = ServerConfig::new("remote", TransportKind::Sse)
            .with_endpoint("http://127.0.0.1:9/sse");
        let transport = SseTransport::new(config, ErrorClassifier::default()).expect("transport");
        let err = transport.list_tools().await.unwrap_err();
        assert_eq!(
            err.code(),
            crate::application::tooling::error::McpErrorCode::ConnectionFailed
        );
    }
}
