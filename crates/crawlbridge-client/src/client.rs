//! The client bridge.
//!
//! `CrawlClient` is the public entry point: it owns the connection, the
//! correlator, and the tool registry, and exposes schema-validated tool
//! invocation with typed outcomes. Each client is an independent object
//! constructed from injected configuration; multiple clients coexist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crawlbridge_core::Config;

use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::outcome::{decode_call_result, ToolEvent, ToolOutput, ToolStream};
use crate::protocol::{
    parse_inbound, CallToolParams, Inbound, InitializeParams, InitializeResult, ListToolsResult,
    Notification, Request, ToolDescriptor, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS,
};
use crate::registry::ToolRegistry;
use crate::schema::validate_arguments;
use crate::transport::{
    Connection, ConnectionState, FrameSink, FrameSource, Transport, WsTransport,
};

/// Snapshot of a client's operational state.
#[derive(Debug, Clone)]
pub struct ClientHealth {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Number of tools in the current catalogue.
    pub tool_count: usize,
    /// Time since the last frame crossed the connection.
    pub idle: Duration,
}

/// Client bridge to a remote content-extraction service.
pub struct CrawlClient {
    config: Config,
    connection: Arc<Connection>,
    correlator: Arc<Correlator>,
    registry: Arc<ToolRegistry>,
    /// Alternate transport used only for discovery, when configured.
    discovery: Option<Box<dyn Transport>>,
    /// Set by an explicit `close()`; the supervisor must not reconnect.
    closing: AtomicBool,
    /// Serializes concurrent `connect()` attempts.
    connect_lock: Mutex<()>,
}

impl CrawlClient {
    /// Create a client from configuration, targeting its endpoint over
    /// WebSocket. The client starts disconnected.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let connect_timeout = config.endpoint.connect_timeout();
        let transport = WsTransport::from_str(&config.endpoint.url, connect_timeout)?;

        let discovery = match &config.endpoint.discovery_url {
            Some(url) => Some(Box::new(WsTransport::from_str(url, connect_timeout)?)
                as Box<dyn Transport>),
            None => None,
        };

        Ok(Self::with_transport(config, Box::new(transport), discovery))
    }

    /// Create a client over an injected transport. Used by tests and by
    /// callers with non-standard channel setups.
    pub fn with_transport(
        config: Config,
        transport: Box<dyn Transport>,
        discovery: Option<Box<dyn Transport>>,
    ) -> Self {
        Self {
            config,
            connection: Connection::new(transport),
            correlator: Arc::new(Correlator::new()),
            registry: Arc::new(ToolRegistry::new()),
            discovery,
            closing: AtomicBool::new(false),
            connect_lock: Mutex::new(()),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether calls can be submitted right now.
    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }

    /// Whether an explicit close was requested.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Subscribe to connection state transitions.
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// The tool registry owned by this client.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Number of requests currently in flight.
    pub async fn pending_count(&self) -> usize {
        self.correlator.pending_count().await
    }

    /// Snapshot of the current tool catalogue.
    pub async fn tools(&self) -> Vec<Arc<ToolDescriptor>> {
        self.registry.tools().await
    }

    /// Operational health summary.
    pub async fn health(&self) -> ClientHealth {
        ClientHealth {
            state: self.connection.state(),
            tool_count: self.registry.len().await,
            idle: self.connection.idle_time(),
        }
    }

    /// Connect: open the channel, run the initialize handshake, and prime
    /// the tool catalogue. No-op when already ready.
    ///
    /// Any failure along the way (socket, handshake, discovery) leaves the
    /// connection in Failed and returns the error.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;

        if self.connection.is_ready() {
            return Ok(());
        }

        self.closing.store(false, Ordering::SeqCst);
        // A fresh remote process may expose a different catalogue.
        self.registry.invalidate().await;

        let source = self.connection.open().await?;
        let epoch = self.connection.epoch();

        tokio::spawn(pump(
            source,
            epoch,
            Arc::clone(&self.connection),
            Arc::clone(&self.correlator),
            Arc::clone(&self.registry),
        ));

        match self.handshake().await {
            Ok(init) => {
                self.connection.mark_ready(init.capabilities).await;
                info!(
                    server = %init.server_info.name,
                    protocol_version = %init.protocol_version,
                    "Connection established"
                );
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                self.connection.mark_failed().await;
                self.correlator.fail_all("handshake failed").await;
                return Err(e);
            }
        }

        match self.refresh_tools().await {
            Ok(count) => {
                debug!(count, "Tool catalogue primed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Tool discovery failed after connect");
                self.connection.mark_failed().await;
                self.correlator.fail_all("discovery failed").await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, ClientError> {
        let connect_timeout = self.config.endpoint.connect_timeout();

        let value = self
            .correlator
            .submit(
                &self.connection,
                METHOD_INITIALIZE,
                Some(InitializeParams::default()),
                connect_timeout,
            )
            .await?;

        let init: InitializeResult = serde_json::from_value(value)
            .map_err(|e| ClientError::protocol(format!("malformed initialize result: {e}")))?;

        let notification: Notification<()> = Notification::new(METHOD_INITIALIZED, None);
        self.connection
            .send(&serde_json::to_string(&notification)?)
            .await
            .map_err(ClientError::from)?;

        Ok(init)
    }

    /// Refresh the tool catalogue via a discovery call.
    ///
    /// On failure the previous catalogue stays intact; callers keep
    /// operating on stale-but-valid data until a refresh succeeds.
    pub async fn refresh_tools(&self) -> Result<usize, ClientError> {
        let deadline = self.config.calls.default_timeout();

        let descriptors = match &self.discovery {
            Some(transport) => discover_over(transport.as_ref(), deadline).await?,
            None => {
                let value = self
                    .correlator
                    .submit(&self.connection, METHOD_LIST_TOOLS, None::<()>, deadline)
                    .await?;
                let list: ListToolsResult = serde_json::from_value(value)
                    .map_err(|e| ClientError::protocol(format!("malformed tool list: {e}")))?;
                list.tools
            }
        };

        let count = descriptors.len();
        self.registry.install(descriptors).await;
        Ok(count)
    }

    /// Call a tool by name with the given arguments.
    ///
    /// Fails fast (no network round-trip) on unknown tools and on
    /// arguments that do not match the tool's schema. A timeout cancels
    /// only the local wait; the remote may still be executing the call.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ClientError> {
        let params = self.prepare_call(name, &args).await?;
        let deadline = timeout.unwrap_or_else(|| self.config.calls.default_timeout());

        let value = self
            .correlator
            .submit(&self.connection, METHOD_CALL_TOOL, Some(params), deadline)
            .await?;

        decode_call_result(value)
    }

    /// Call a tool whose reply may arrive in parts.
    ///
    /// Returns a finite stream of chunk events terminated by exactly one
    /// `Completed` or `Failed` event.
    pub async fn call_streaming(
        &self,
        name: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolStream, ClientError> {
        let params = self.prepare_call(name, &args).await?;
        let deadline = timeout.unwrap_or_else(|| self.config.calls.default_timeout());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (chunks_tx, mut chunks_rx) = mpsc::unbounded_channel();

        let correlator = Arc::clone(&self.correlator);
        let connection = Arc::clone(&self.connection);

        tokio::spawn(async move {
            let submit = correlator.submit_with_chunks(
                &connection,
                METHOD_CALL_TOOL,
                Some(params),
                deadline,
                chunks_tx,
            );
            tokio::pin!(submit);

            let mut chunks_done = false;
            let terminal = loop {
                tokio::select! {
                    result = &mut submit => {
                        // Deliver chunks that raced with the reply.
                        while let Ok(chunk) = chunks_rx.try_recv() {
                            let _ = events_tx.send(ToolEvent::Chunk(chunk));
                        }
                        break result;
                    }
                    maybe = chunks_rx.recv(), if !chunks_done => {
                        match maybe {
                            Some(chunk) => {
                                let _ = events_tx.send(ToolEvent::Chunk(chunk));
                            }
                            None => chunks_done = true,
                        }
                    }
                }
            };

            let event = match terminal.and_then(decode_call_result) {
                Ok(output) => ToolEvent::Completed(output),
                Err(e) => ToolEvent::Failed(e),
            };
            let _ = events_tx.send(event);
        });

        Ok(ToolStream::new(events_rx))
    }

    async fn prepare_call(&self, name: &str, args: &Value) -> Result<CallToolParams, ClientError> {
        if !self.connection.is_ready() {
            return Err(ClientError::unavailable(format!(
                "transport is {}",
                self.connection.state()
            )));
        }

        let descriptor = self.registry.lookup(name).await?;

        validate_arguments(&descriptor, args)
            .map_err(|message| ClientError::invalid_arguments(name, message))?;

        let arguments = match args {
            Value::Null => None,
            other => Some(other.clone()),
        };

        Ok(CallToolParams {
            name: name.to_string(),
            arguments,
        })
    }

    /// Close the connection and fail anything still pending.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.connection.close().await;
        self.correlator.fail_all("connection closed").await;
        self.registry.invalidate().await;
        info!("Connection closed");
    }
}

/// Reader loop for one channel generation: dispatch inbound frames to the
/// correlator until the channel ends, then fail everything that was still
/// in flight and drop the catalogue.
async fn pump(
    mut source: Box<dyn FrameSource>,
    epoch: u64,
    connection: Arc<Connection>,
    correlator: Arc<Correlator>,
    registry: Arc<ToolRegistry>,
) {
    let reason = loop {
        match source.next_frame().await {
            Some(Ok(frame)) => {
                connection.touch();
                correlator.dispatch(&frame).await;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Transport read failed");
                break e.to_string();
            }
            None => {
                debug!("Transport channel ended");
                break "transport channel ended".to_string();
            }
        }
    };

    // A reader from a superseded channel must not touch the current
    // connection: a reconnect may already have primed a fresh catalogue
    // and have its own calls in flight.
    if connection.epoch() != epoch {
        debug!("Stale transport reader ended; current connection unaffected");
        return;
    }

    connection.mark_failed_for(epoch).await;
    registry.invalidate().await;
    correlator.fail_all(&reason).await;
}

/// One-shot discovery over an alternate endpoint: open, handshake, list
/// tools, close. The exchange is strictly sequential, so it runs directly
/// on the channel halves without a correlator.
async fn discover_over(
    transport: &dyn Transport,
    deadline: Duration,
) -> Result<Vec<ToolDescriptor>, ClientError> {
    let (mut sink, mut source) = transport.open().await?;

    let init = exchange(
        sink.as_mut(),
        source.as_mut(),
        1,
        METHOD_INITIALIZE,
        Some(InitializeParams::default()),
        deadline,
    )
    .await?;
    let _: InitializeResult = serde_json::from_value(init)
        .map_err(|e| ClientError::protocol(format!("malformed initialize result: {e}")))?;

    let notification: Notification<()> = Notification::new(METHOD_INITIALIZED, None);
    sink.send(&serde_json::to_string(&notification)?).await?;

    let value = exchange(
        sink.as_mut(),
        source.as_mut(),
        2,
        METHOD_LIST_TOOLS,
        None::<()>,
        deadline,
    )
    .await?;
    let list: ListToolsResult = serde_json::from_value(value)
        .map_err(|e| ClientError::protocol(format!("malformed tool list: {e}")))?;

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Error closing discovery channel");
    }

    Ok(list.tools)
}

async fn exchange<P: serde::Serialize>(
    sink: &mut dyn FrameSink,
    source: &mut dyn FrameSource,
    id: u64,
    method: &str,
    params: Option<P>,
    deadline: Duration,
) -> Result<Value, ClientError> {
    let request = Request::new(id, method, params);
    sink.send(&serde_json::to_string(&request)?).await?;

    let wait = async {
        loop {
            let frame = match source.next_frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ClientError::Transport(e)),
                None => {
                    return Err(ClientError::ConnectionLost(
                        "discovery channel ended".to_string(),
                    ))
                }
            };

            match parse_inbound(&frame) {
                Ok(Inbound::Reply { id: reply_id, outcome }) if reply_id == id => {
                    return outcome.map_err(|e| ClientError::remote(e.code, e.message));
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed frame during discovery");
                    continue;
                }
            }
        }
    };

    tokio::time::timeout(deadline, wait)
        .await
        .map_err(|_| ClientError::Timeout(deadline))?
}
