use super::*;
use crate::application::tooling::error::McpErrorKind;
use crate::application::tooling::testing::FakeTransport;
use serde_json::Map;

fn connection(transport: Arc<FakeTransport>, retries: u32) -> ServerConnection {
    let config = ServerConfig::new("fake", TransportKind::InMemory).with_max_retries(retries);
    ServerConnection::with_retry_delay(config, transport, Duration::ZERO)
}

#[tokio::test]
async fn acquire_connects_once_and_reuses() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]));
    let conn = connection(Arc::clone(&transport), 0);

    let tools = conn.acquire().await.expect("first acquire");
    assert_eq!(tools.len(), 1);
    conn.acquire().await.expect("second acquire");

    assert_eq!(transport.connect_count(), 1);
    assert_eq!(conn.ref_count().await, 2);
    assert_eq!(conn.status().await, ConnectionStatus::Connected);
}

#[tokio::test]
async fn release_closes_only_after_last_holder() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]));
    let conn = connection(Arc::clone(&transport), 0);
    conn.acquire().await.expect("acquire");
    conn.acquire().await.expect("acquire");

    conn.release().await.expect("release");
    assert_eq!(transport.close_count(), 0);
    assert_eq!(conn.status().await, ConnectionStatus::Connected);

    conn.release().await.expect("release");
    assert_eq!(transport.close_count(), 1);
    assert_eq!(conn.status().await, ConnectionStatus::Disconnected);
    assert!(conn.tools().await.is_empty());

    // extra releases are harmless
    conn.release().await.expect("release");
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn retryable_failures_are_retried_up_to_max_retries() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]).failing(2, true));
    let conn = connection(Arc::clone(&transport), 2);

    conn.acquire().await.expect("third attempt succeeds");
    assert_eq!(transport.connect_count(), 3);
}

#[tokio::test]
async fn retries_exhausted_leaves_error_status() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]).failing(5, true));
    let conn = connection(Arc::clone(&transport), 1);

    let err = conn.acquire().await.unwrap_err();
    assert_eq!(err.kind, McpErrorKind::Connection);
    assert_eq!(err.server.as_deref(), Some("fake"));
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(conn.status().await, ConnectionStatus::Error);
    assert!(conn.last_error().await.is_some());
}

#[tokio::test]
async fn fatal_failures_are_not_retried() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]).failing(1, false));
    let conn = connection(Arc::clone(&transport), 3);

    let err = conn.acquire().await.unwrap_err();
    assert_eq!(err.kind, McpErrorKind::InitializationFailed);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn calls_require_a_connected_server() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]));
    let conn = connection(Arc::clone(&transport), 0);

    let err = conn
        .call_tool(ToolCallRequest::new("echo", Map::new()), CallToolOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, McpErrorKind::Connection);

    conn.acquire().await.expect("acquire");
    let result = conn
        .call_tool(ToolCallRequest::new("echo", Map::new()), CallToolOptions::default())
        .await
        .expect("call");
    assert_eq!(result.render(), "echo ok");
    assert_eq!(transport.recorded_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn readers_do_not_wait_for_a_slow_connect() {
    let transport = Arc::new(
        FakeTransport::with_tools(&["echo"])
            .slow_connect(Duration::from_secs(60))
            .failing(1, true),
    );
    let conn = Arc::new(connection(Arc::clone(&transport), 1));

    let connecting = Arc::clone(&conn);
    let handle = tokio::spawn(async move { connecting.acquire().await });
    while conn.status().await != ConnectionStatus::Connecting {
        tokio::task::yield_now().await;
    }

    let tools = tokio::time::timeout(Duration::from_millis(100), conn.tools())
        .await
        .expect("tools() must not wait for the connect");
    assert!(tools.is_empty());
    let status = tokio::time::timeout(Duration::from_millis(100), conn.status())
        .await
        .expect("status() must not wait for the connect");
    assert_eq!(status, ConnectionStatus::Connecting);

    handle.await.expect("join").expect("second attempt connects");
    assert_eq!(conn.status().await, ConnectionStatus::Connected);
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn concurrent_acquires_connect_once() {
    let transport = Arc::new(FakeTransport::with_tools(&["echo"]));
    let conn = Arc::new(connection(Arc::clone(&transport), 0));

    let (first, second) = tokio::join!(conn.acquire(), conn.acquire());
    first.expect("first");
    second.expect("second");
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(conn.ref_count().await, 2);
}
