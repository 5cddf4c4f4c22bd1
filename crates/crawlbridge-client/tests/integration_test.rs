//! Integration tests for the client bridge against a scripted in-memory
//! transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use crawlbridge_client::transport::{FrameSink, FrameSource, Transport};
use crawlbridge_client::{
    supervisor, ConnectionState, CrawlClient, ToolEvent, TransportError,
};
use crawlbridge_core::config::ReconnectConfig;
use crawlbridge_core::Config;

/// Scripted behavior for a tools/call request, keyed by tool name.
#[derive(Clone)]
enum Script {
    /// Reply immediately with this result value.
    Reply(Value),
    /// Reply with this result after a delay.
    DelayedReply(Duration, Value),
    /// Echo the call arguments back, delayed so later calls can overtake.
    EchoArgsStaggered,
    /// Send progress notifications, then this terminal result.
    Chunks(Vec<Value>, Value),
    /// Never reply.
    Silence,
}

/// In-memory remote endpoint speaking the wire protocol over channels.
struct MockRemote {
    /// Tool catalogues served per connection (the last one repeats).
    catalogues: Vec<Vec<Value>>,
    scripts: HashMap<String, Script>,
    /// Request envelopes received (frames carrying an id).
    requests: AtomicUsize,
    opens: AtomicUsize,
    drop_signal: Notify,
    /// When set, a connection closed by the client keeps its read half
    /// open until `release_held_sources` is called.
    hold_closed: AtomicBool,
    release: Notify,
}

impl MockRemote {
    fn new(catalogue: Vec<Value>, scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Self::with_catalogues(vec![catalogue], scripts)
    }

    fn with_catalogues(catalogues: Vec<Vec<Value>>, scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            catalogues,
            scripts: scripts
                .into_iter()
                .map(|(name, s)| (name.to_string(), s))
                .collect(),
            requests: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            drop_signal: Notify::new(),
            hold_closed: AtomicBool::new(false),
            release: Notify::new(),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Kill the current connection from the server side.
    fn drop_connection(&self) {
        self.drop_signal.notify_one();
    }

    /// Make client-closed connections keep their read half open until
    /// released, like a remote whose close reply is slow to arrive.
    fn hold_closed_sources(&self) {
        self.hold_closed.store(true, Ordering::SeqCst);
    }

    fn release_held_sources(&self) {
        self.release.notify_one();
    }

    fn catalogue_for(&self, open_index: usize) -> Vec<Value> {
        self.catalogues
            .get(open_index)
            .or_else(|| self.catalogues.last())
            .cloned()
            .unwrap_or_default()
    }

    fn handle_request(
        self: &Arc<Self>,
        open_index: usize,
        frame: &str,
        reply_tx: &mpsc::UnboundedSender<String>,
    ) {
        let envelope: Value = serde_json::from_str(frame).expect("client sent invalid JSON");
        let Some(id) = envelope.get("id").and_then(Value::as_u64) else {
            // Notification, nothing to do.
            return;
        };
        self.requests.fetch_add(1, Ordering::SeqCst);

        let method = envelope["method"].as_str().unwrap_or_default();
        match method {
            "initialize" => {
                let _ = reply_tx.send(reply_ok(
                    id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {"listChanged": false}},
                        "serverInfo": {"name": "mock-crawler", "version": "0.0.1"}
                    }),
                ));
            }
            "tools/list" => {
                let _ = reply_tx.send(reply_ok(
                    id,
                    json!({"tools": self.catalogue_for(open_index)}),
                ));
            }
            "tools/call" => {
                let name = envelope["params"]["name"].as_str().unwrap_or_default();
                let arguments = envelope["params"]["arguments"].clone();
                match self.scripts.get(name) {
                    None => {
                        let _ = reply_tx.send(reply_err(id, -32601, "unknown tool"));
                    }
                    Some(Script::Reply(result)) => {
                        let _ = reply_tx.send(reply_ok(id, result.clone()));
                    }
                    Some(Script::DelayedReply(delay, result)) => {
                        let tx = reply_tx.clone();
                        let delay = *delay;
                        let result = result.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(reply_ok(id, result));
                        });
                    }
                    Some(Script::EchoArgsStaggered) => {
                        let n = arguments["n"].as_u64().unwrap_or(0);
                        let delay = Duration::from_millis((20 - n.min(20)) * 5);
                        let tx = reply_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(reply_ok(id, arguments));
                        });
                    }
                    Some(Script::Chunks(chunks, terminal)) => {
                        for (sequence, chunk) in chunks.iter().enumerate() {
                            let _ = reply_tx.send(
                                json!({
                                    "jsonrpc": "2.0",
                                    "method": "notifications/progress",
                                    "params": {
                                        "requestId": id,
                                        "sequence": sequence,
                                        "chunk": chunk
                                    }
                                })
                                .to_string(),
                            );
                        }
                        let _ = reply_tx.send(reply_ok(id, terminal.clone()));
                    }
                    Some(Script::Silence) => {}
                }
            }
            other => {
                let _ = reply_tx.send(reply_err(id, -32601, &format!("no method {other}")));
            }
        }
    }
}

fn reply_ok(id: u64, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

fn reply_err(id: u64, code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
}

struct MockTransport {
    remote: Arc<MockRemote>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        let open_index = self.remote.opens.fetch_add(1, Ordering::SeqCst);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let remote = Arc::clone(&self.remote);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = remote.drop_signal.notified() => break,
                    maybe = out_rx.recv() => match maybe {
                        Some(frame) => remote.handle_request(open_index, &frame, &in_tx),
                        None => {
                            if remote.hold_closed.load(Ordering::SeqCst) {
                                remote.release.notified().await;
                            }
                            break;
                        }
                    },
                }
            }
            // Dropping in_tx ends the client's frame source.
        });

        Ok((
            Box::new(MockSink { tx: Some(out_tx) }),
            Box::new(MockSource { rx: in_rx }),
        ))
    }
}

struct MockSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(frame.to_string())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

fn tool(name: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required
        }
    })
}

fn url_tool(name: &str) -> Value {
    tool(name, json!({"url": {"type": "string"}}), &["url"])
}

fn client_for(remote: &Arc<MockRemote>) -> CrawlClient {
    let mut config = Config::default();
    config.calls.default_timeout_secs = 5;
    CrawlClient::with_transport(
        config,
        Box::new(MockTransport {
            remote: Arc::clone(remote),
        }),
        None,
    )
}

async fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_connect_discovers_tools() {
    let remote = MockRemote::new(vec![url_tool("md"), url_tool("screenshot")], vec![]);
    let client = client_for(&remote);

    client.connect().await.expect("connect failed");

    assert_eq!(client.state(), ConnectionState::Ready);
    let names: Vec<String> = client.tools().await.iter().map(|t| t.name.clone()).collect();
    assert_eq!(names, vec!["md", "screenshot"]);
    // One initialize, one tools/list.
    assert_eq!(remote.request_count(), 2);
}

#[tokio::test]
async fn test_connect_is_idempotent_when_ready() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = client_for(&remote);

    client.connect().await.unwrap();
    let requests_after_first = remote.request_count();

    client.connect().await.unwrap();
    assert_eq!(remote.request_count(), requests_after_first);
}

#[tokio::test]
async fn test_markdown_extraction_success() {
    let remote = MockRemote::new(
        vec![url_tool("md")],
        vec![("md", Script::Reply(json!({"markdown": "# Example"})))],
    );
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let output = client
        .call("md", json!({"url": "https://example.com"}), None)
        .await
        .unwrap();

    assert_eq!(output.document(), Some(&json!({"markdown": "# Example"})));
}

#[tokio::test]
async fn test_binary_payload_returned_undecoded() {
    let remote = MockRemote::new(
        vec![url_tool("screenshot")],
        vec![(
            "screenshot",
            Script::Reply(json!({
                "content": [{"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"}],
                "isError": false
            })),
        )],
    );
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let output = client
        .call("screenshot", json!({"url": "https://example.com"}), None)
        .await
        .unwrap();

    let (data, mime) = output.binary().expect("expected binary payload");
    assert_eq!(data, b"hello");
    assert_eq!(mime, "image/png");
}

#[tokio::test]
async fn test_tool_not_found_without_round_trip() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let baseline = remote.request_count();
    let err = client.call("nonexistent_tool", json!({}), None).await.unwrap_err();

    assert_eq!(err.kind(), "tool_not_found");
    assert_eq!(remote.request_count(), baseline);
}

#[tokio::test]
async fn test_invalid_arguments_without_round_trip() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let baseline = remote.request_count();

    let err = client.call("md", json!({}), None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_arguments");
    assert!(err.to_string().contains("missing required argument 'url'"));

    let err = client.call("md", json!({"url": 42}), None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_arguments");

    assert_eq!(remote.request_count(), baseline);
}

#[tokio::test]
async fn test_call_while_disconnected_fails_fast() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = client_for(&remote);

    let start = Instant::now();
    let err = client
        .call("md", json!({"url": "https://example.com"}), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "connection_unavailable");
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(remote.request_count(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let remote = MockRemote::new(
        vec![tool("echo", json!({"n": {"type": "integer"}}), &["n"])],
        vec![("echo", Script::EchoArgsStaggered)],
    );
    let client = Arc::new(client_for(&remote));
    client.connect().await.unwrap();

    // Later submissions get earlier replies; correlation must not care.
    let mut handles = Vec::new();
    for n in 0..8u64 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let output = client.call("echo", json!({"n": n}), None).await.unwrap();
            (n, output)
        }));
    }

    for handle in handles {
        let (n, output) = handle.await.unwrap();
        assert_eq!(output.document(), Some(&json!({"n": n})));
    }
}

#[tokio::test]
async fn test_timeout_frees_slot_and_late_reply_is_dropped() {
    let remote = MockRemote::new(
        vec![url_tool("slow")],
        vec![(
            "slow",
            Script::DelayedReply(Duration::from_millis(150), json!({"ok": true})),
        )],
    );
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let err = client
        .call(
            "slow",
            json!({"url": "https://example.com"}),
            Some(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert_eq!(client.pending_count().await, 0);

    // The late reply for the timed-out id arrives during this second call
    // and must not disturb it.
    let output = client
        .call(
            "slow",
            json!({"url": "https://example.com"}),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert_eq!(output.document(), Some(&json!({"ok": true})));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_transport_drop_fails_all_pending() {
    let remote = MockRemote::new(
        vec![url_tool("hang")],
        vec![("hang", Script::Silence)],
    );
    let client = Arc::new(client_for(&remote));
    client.connect().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client
                .call(
                    "hang",
                    json!({"url": "https://example.com"}),
                    Some(Duration::from_secs(10)),
                )
                .await
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count().await, 3);

    remote.drop_connection();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "connection_lost");
    }
    assert_eq!(client.pending_count().await, 0);
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_reconnect_serves_fresh_catalogue() {
    let remote = MockRemote::with_catalogues(
        vec![
            vec![url_tool("md")],
            vec![url_tool("md"), url_tool("screenshot")],
        ],
        vec![],
    );
    let client = client_for(&remote);

    client.connect().await.unwrap();
    let first_generation = client.registry().generation().await.unwrap();
    assert!(client.registry().lookup("screenshot").await.is_err());

    remote.drop_connection();
    wait_until("connection failure", Duration::from_secs(2), || {
        client.state() == ConnectionState::Failed
    })
    .await;

    // While down, the stale catalogue must not be served.
    let err = client.registry().lookup("md").await.unwrap_err();
    assert_eq!(err.kind(), "connection_unavailable");

    client.connect().await.unwrap();
    let second_generation = client.registry().generation().await.unwrap();

    assert!(second_generation > first_generation);
    assert!(client.registry().lookup("screenshot").await.is_ok());
}

#[tokio::test]
async fn test_lingering_old_reader_leaves_reconnected_client_intact() {
    let remote = MockRemote::new(
        vec![url_tool("md")],
        vec![("md", Script::Reply(json!({"markdown": "# Example"})))],
    );
    remote.hold_closed_sources();
    let client = client_for(&remote);

    // First connection's read half outlives the close.
    client.connect().await.unwrap();
    client.close().await;
    client.connect().await.unwrap();
    let generation = client.registry().generation().await.unwrap();

    // The old read half ends only now, well after the reconnect.
    remote.release_held_sources();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.registry().generation().await, Some(generation));
    let output = client
        .call("md", json!({"url": "https://example.com"}), None)
        .await
        .unwrap();
    assert_eq!(output.document(), Some(&json!({"markdown": "# Example"})));
}

#[tokio::test]
async fn test_supervisor_reconnects_and_reprimes() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = Arc::new(client_for(&remote));
    client.connect().await.unwrap();
    let first_generation = client.registry().generation().await.unwrap();

    let policy = ReconnectConfig {
        max_attempts: None,
        initial_backoff_ms: 10,
        backoff_multiplier: 2.0,
        backoff_cap_ms: 100,
        jitter: 0.0,
    };
    let handle = supervisor::spawn(Arc::clone(&client), policy);

    remote.drop_connection();

    // The drop must propagate before Ready means "reconnected".
    let client_ref = Arc::clone(&client);
    wait_until("connection drop", Duration::from_secs(5), move || {
        !client_ref.is_ready()
    })
    .await;

    let client_ref = Arc::clone(&client);
    wait_until("supervised reconnect", Duration::from_secs(5), move || {
        client_ref.is_ready()
    })
    .await;

    let second_generation = client.registry().generation().await.unwrap();
    assert!(second_generation > first_generation);

    handle.stop();
}

#[tokio::test]
async fn test_supervisor_ignores_explicit_close() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = Arc::new(client_for(&remote));
    client.connect().await.unwrap();

    let policy = ReconnectConfig {
        max_attempts: None,
        initial_backoff_ms: 10,
        backoff_multiplier: 2.0,
        backoff_cap_ms: 100,
        jitter: 0.0,
    };
    let handle = supervisor::spawn(Arc::clone(&client), policy);

    client.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let err = client
        .call("md", json!({"url": "https://example.com"}), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "connection_unavailable");

    handle.stop();
}

#[tokio::test]
async fn test_streaming_chunks_then_terminal() {
    let remote = MockRemote::new(
        vec![url_tool("crawl")],
        vec![(
            "crawl",
            Script::Chunks(
                vec![json!({"page": 1}), json!({"page": 2})],
                json!({"pages": 2, "done": true}),
            ),
        )],
    );
    let client = client_for(&remote);
    client.connect().await.unwrap();

    let stream = client
        .call_streaming("crawl", json!({"url": "https://example.com"}), None)
        .await
        .unwrap();

    let events: Vec<ToolEvent> = stream.collect().await;
    assert_eq!(events.len(), 3);

    match &events[0] {
        ToolEvent::Chunk(chunk) => {
            assert_eq!(chunk.sequence, 0);
            assert_eq!(chunk.payload, json!({"page": 1}));
        }
        other => panic!("expected chunk, got {other:?}"),
    }
    match &events[1] {
        ToolEvent::Chunk(chunk) => assert_eq!(chunk.sequence, 1),
        other => panic!("expected chunk, got {other:?}"),
    }
    match &events[2] {
        ToolEvent::Completed(output) => {
            assert_eq!(output.document(), Some(&json!({"pages": 2, "done": true})));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_error_is_typed() {
    let remote = MockRemote::new(vec![url_tool("md")], vec![]);
    let client = client_for(&remote);
    client.connect().await.unwrap();

    // "md" is in the catalogue but has no script, so the remote rejects it.
    let err = client
        .call("md", json!({"url": "https://example.com"}), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "remote_tool_error");
    assert!(err.to_string().contains("unknown tool"));
}
