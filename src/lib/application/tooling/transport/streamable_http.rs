use super::rpc::{self, RpcChannel};
use super::{McpTransport, bounded};
use crate::application::tooling::classify::ErrorClassifier;
use crate::application::tooling::error::McpError;
use crate::application::tooling::types::{
    CallToolOptions, PromptInfo, ResourceInfo, ToolCallRequest, ToolCallResult, ToolInfo,
};
use crate::config::{ServerConfig, TransportKind};
use crate::constants::MCP_PROTOCOL_VERSION;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// POST-per-message transport; responses arrive as JSON or as an event stream.
pub struct StreamableHttpTransport {
    server: ServerConfig,
    endpoint: String,
    http: reqwest::Client,
    session_id: AsyncMutex<Option<String>>,
    protocol_version: AsyncMutex<Option<String>>,
    id_counter: AtomicU64,
    classifier: ErrorClassifier,
}

impl StreamableHttpTransport {
    pub fn new(server: ServerConfig, classifier: ErrorClassifier) -> Result<Self, McpError> {
        let endpoint = server.endpoint.clone().ok_or_else(|| {
            McpError::initialization_failed("streamable HTTP transport requires an endpoint")
                .with_server(&server.name)
        })?;
        let http = build_http_client()
            .map_err(|err| http_error(err, &server.name, &classifier))?;
        Ok(Self {
            server,
            endpoint,
            http,
            session_id: AsyncMutex::new(None),
            protocol_version: AsyncMutex::new(None),
            id_counter: AtomicU64::new(1),
            classifier,
        })
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(self.server.timeout())
    }

    async fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = apply_post_headers(request);
        let version = self.protocol_version.lock().await.clone();
        request = apply_protocol_version_header(
            request,
            Some(version.as_deref().unwrap_or(MCP_PROTOCOL_VERSION)),
        );
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(MCP_SESSION_ID_HEADER, session);
        }
        for (name, value) in &self.server.headers {
            request = request.header(name, value);
        }
        request
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, McpError> {
        let request = self.decorate(self.http.post(&self.endpoint)).await.json(payload);
        let response = request
            .send()
            .await
            .map_err(|err| http_error(err, &self.server.name, &self.classifier))?;

        if let Some(session) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.lock().await.is_some() {
            self.session_id.lock().await.take();
            return Err(McpError::connection_closed("MCP session expired")
                .with_server(&self.server.name));
        }
        if !status.is_success() {
            return Err(McpError::transport(
                TransportKind::StreamableHttp.as_str(),
                format!("HTTP {} from {}", status.as_u16(), self.endpoint),
            )
            .with_server(&self.server.name));
        }
        Ok(response)
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
        id: &str,
    ) -> Result<Value, McpError> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let envelope = if is_event_stream_content_type(&content_type) {
            self.next_sse_response(response, id).await?
        } else {
            response
                .json::<Value>()
                .await
                .map_err(|err| http_error(err, &self.server.name, &self.classifier))?
        };
        rpc::response_result(envelope, &self.server.name, TransportKind::StreamableHttp)
    }

    async fn next_sse_response(
        &self,
        response: reqwest::Response,
        id: &str,
    ) -> Result<Value, McpError> {
        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| http_error(err, &self.server.name, &self.classifier))?;
            for line in buffer.push(&chunk) {
                if let Some(envelope) = response_for(&line, id) {
                    return Ok(envelope);
                }
            }
        }
        for line in buffer.finish() {
            if let Some(envelope) = response_for(&line, id) {
                return Ok(envelope);
            }
        }

        Err(McpError::transport(
            TransportKind::StreamableHttp.as_str(),
            "event stream ended without a response",
        )
        .with_server(&self.server.name))
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn connect(&self) -> Result<(), McpError> {
        let result = rpc::initialize(self, self.default_timeout()).await?;
        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            *self.protocol_version.lock().await = Some(version.to_string());
        }
        info!(server = %self.server.name, endpoint = %self.endpoint, "Connected streamable HTTP MCP server");
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        let session = self.session_id.lock().await.take();
        if let Some(session) = session {
            let request = self
                .http
                .delete(&self.endpoint)
                .header(MCP_SESSION_ID_HEADER, session);
            if let Err(err) = request.send().await {
                debug!(server = %self.server.name, %err, "failed to terminate MCP session");
            }
        }
        self.protocol_version.lock().await.take();
        Ok(())
    }

    async fn ping(&self) -> Result<(), McpError> {
        rpc::ping(self, self.default_timeout()).await
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        rpc::list_tools(self, self.default_timeout()).await
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
        rpc::call_tool(self, request, meta, options).await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, McpError> {
        rpc::list_prompts(self, self.default_timeout()).await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, McpError> {
        rpc::list_resources(self, self.default_timeout()).await
    }
}

#[async_trait]
impl RpcChannel for StreamableHttpTransport {
    fn server(&self) -> &str {
        &self.server.name
    }

    fn transport(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = format!("req-{}", self.id_counter.fetch_add(1, Ordering::SeqCst));
        let payload = rpc::request_payload(&id, method, params);
        let what = format!("request '{method}'");
        bounded(timeout, &self.server.name, &what, async {
            let response = self.post(&payload).await?;
            self.read_response(response, &id).await
        })
        .await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.post(&rpc::notification_payload(method, params))
            .await
            .map(|_| ())
    }
}

fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Network failures: reqwest knows timeouts and refused connections; anything else
/// goes through message classification.
pub(crate) fn http_error(
    err: reqwest::Error,
    server: &str,
    classifier: &ErrorClassifier,
) -> McpError {
    if err.is_timeout() {
        McpError::timeout(err.to_string(), 0)
            .with_server(server)
            .with_cause(err)
    } else if err.is_connect() {
        McpError::connection(err.to_string())
            .with_server(server)
            .with_cause(err)
    } else {
        classifier.classify(err, Some(server))
    }
}

pub fn apply_post_headers(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

/// Splits a byte stream into trimmed, non-empty lines across chunk boundaries.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let newline = start + offset;
            if let Ok(text) = std::str::from_utf8(&self.buffer[start..newline]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            start = newline + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[start..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if start > 0 {
            self.buffer.drain(..start);
        }

        lines
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// The envelope answering request `id`, if this line carries it.
fn response_for(line: &str, id: &str) -> Option<Value> {
    let payload = sse_data_payload(line).filter(|payload| !payload.is_empty())?;
    let envelope = serde_json::from_str::<Value>(payload).ok()?;
    let matches = envelope
        .get("id")
        .and_then(rpc::response_key)
        .is_some_and(|key| key == id);
    let is_response = envelope.get("result").is_some() || envelope.get("error").is_some();
    (matches && is_response).then_some(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tooling::error::McpErrorKind;
    use crate::config::ClassifierConfig;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn sse_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: one").is_empty());
        assert_eq!(buffer.push(b"\r\n\n"), vec!["data: one"]);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type("text/event-stream; charset=utf-8"));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn only_the_matching_response_is_taken_from_the_stream() {
        let notification = r#"data: {"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#;
        let other = r#"data: {"jsonrpc":"2.0","id":"req-9","result":{}}"#;
        let ours = r#"data: {"jsonrpc":"2.0","id":"req-2","result":{"tools":[]}}"#;

        assert!(response_for(notification, "req-2").is_none());
        assert!(response_for(other, "req-2").is_none());
        assert!(response_for("event: message", "req-2").is_none());
        let envelope = response_for(ours, "req-2").expect("matching response");
        assert_eq!(envelope["result"]["tools"], serde_json::json!([]));
    }

    #[test]
    fn protocol_header_ignored_when_blank() {
        let client = reqwest::Client::new();
        let req = apply_protocol_version_header(client.post("https://example.com"), Some("  "))
            .build()
            .expect("request");
        assert!(req.headers().get(MCP_PROTOCOL_VERSION_HEADER).is_none());
    }

    #[test]
    fn post_headers_accept_json_and_event_streams() {
        let client = reqwest::Client::new();
        let req = apply_post_headers(client.post("https://example.com"))
            .build()
            .expect("request");
        assert_eq!(
            req.headers().get("Accept").and_then(|v| v.to_str().ok()),
            Some(MCP_JSON_AND_SSE_ACCEPT)
        );
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let config = ServerConfig::new("remote", TransportKind::StreamableHttp);
        assert!(StreamableHttpTransport::new(config, ErrorClassifier::default()).is_err());
    }

    type Reply = fn(&str, &str) -> (&'static str, String);

    /// Minimal HTTP/1.1 endpoint: requests with an id get `reply(method, id)`,
    /// notifications and session teardown get 202.
    async fn serve(reply: Reply) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Some(body) = read_request_body(&mut socket).await else {
                        return;
                    };
                    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    let method = request["method"].as_str().unwrap_or_default();
                    let response = match request.get("id").and_then(Value::as_str) {
                        Some(id) => {
                            let (content_type, payload) = reply(method, id);
                            format!(
                                "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\n{MCP_SESSION_ID_HEADER}: session-1\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
                                payload.len()
                            )
                        }
                        None => "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string(),
                    };
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/mcp")
    }

    async fn read_request_body(socket: &mut TcpStream) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            data.extend_from_slice(&chunk[..read]);
            let Some(end) = data.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let start = end + 4;
            while data.len() < start + length {
                let read = socket.read(&mut chunk).await.ok()?;
                if read == 0 {
                    return None;
                }
                data.extend_from_slice(&chunk[..read]);
            }
            return Some(data[start..start + length].to_vec());
        }
    }

    fn result_for(method: &str) -> Value {
        match method {
            "initialize" => json!({
                "protocolVersion": "2025-06-18",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "local", "version": "1.0.0" }
            }),
            "tools/list" => json!({
                "tools": [{ "name": "echo", "inputSchema": { "type": "object" } }]
            }),
            "tools/call" => json!({ "content": [{ "type": "text", "text": "pong" }] }),
            _ => json!({}),
        }
    }

    fn json_reply(method: &str, id: &str) -> (&'static str, String) {
        let envelope = json!({ "jsonrpc": "2.0", "id": id, "result": result_for(method) });
        (MCP_JSON_CONTENT_TYPE, envelope.to_string())
    }

    fn event_stream_reply(method: &str, id: &str) -> (&'static str, String) {
        let progress = json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": {} });
        let envelope = json!({ "jsonrpc": "2.0", "id": id, "result": result_for(method) });
        let body = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {envelope}\n\n");
        ("text/event-stream", body)
    }

    fn garbage_reply(_method: &str, _id: &str) -> (&'static str, String) {
        (MCP_JSON_CONTENT_TYPE, "definitely not json".to_string())
    }

    fn transport_for(endpoint: String, classifier: ErrorClassifier) -> StreamableHttpTransport {
        let config = ServerConfig::new("remote", TransportKind::StreamableHttp)
            .with_endpoint(endpoint)
            .with_timeout_seconds(5);
        StreamableHttpTransport::new(config, classifier).expect("transport")
    }

    async fn exercise(transport: &StreamableHttpTransport) {
        transport.connect().await.expect("handshake");
        assert_eq!(
            transport.protocol_version.lock().await.as_deref(),
            Some("2025-06-18")
        );
        assert_eq!(transport.session_id.lock().await.as_deref(), Some("session-1"));

        let tools = transport.list_tools().await.expect("tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = transport
            .call_tool(
                ToolCallRequest::new("echo", serde_json::Map::new()),
                None,
                CallToolOptions::default(),
            )
            .await
            .expect("call");
        assert_eq!(result.render(), "pong");

        transport.close().await.expect("close");
        assert!(transport.session_id.lock().await.is_none());
    }

    #[tokio::test]
    async fn json_responses_drive_a_full_session() {
        let endpoint = serve(json_reply).await;
        exercise(&transport_for(endpoint, ErrorClassifier::default())).await;
    }

    #[tokio::test]
    async fn event_stream_responses_are_matched_by_request_id() {
        let endpoint = serve(event_stream_reply).await;
        exercise(&transport_for(endpoint, ErrorClassifier::default())).await;
    }

    #[tokio::test]
    async fn undecodable_bodies_use_the_configured_markers() {
        let endpoint = serve(garbage_reply).await;

        let fallback = transport_for(endpoint.clone(), ErrorClassifier::default());
        let err = fallback.list_tools().await.unwrap_err();
        assert_eq!(err.kind, McpErrorKind::Unknown);
        assert_eq!(err.server.as_deref(), Some("remote"));

        let custom = ErrorClassifier::new(&ClassifierConfig {
            timeout_markers: Vec::new(),
            connect_markers: vec!["decoding".to_string()],
        });
        let err = transport_for(endpoint, custom).list_tools().await.unwrap_err();
        assert_eq!(err.kind, McpErrorKind::Connection);
    }
}
