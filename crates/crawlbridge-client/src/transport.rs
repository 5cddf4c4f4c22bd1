//! Transport layer.
//!
//! A transport owns one bidirectional, ordered-per-direction message channel
//! to the remote endpoint and knows nothing about message semantics. The
//! production transport is a WebSocket (`tokio-tungstenite`); tests inject
//! channel-backed transports through the same trait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;
use crate::protocol::ServerCapabilities;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel to the remote endpoint.
    Disconnected,
    /// Socket connect and protocol handshake in progress.
    Connecting,
    /// Handshake complete; the only state in which calls may be sent.
    Ready,
    /// An explicit close is in progress.
    Closing,
    /// Irrecoverable transport error from Connecting or Ready.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Closing => write!(f, "closing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Writer half of an open transport. Writes are serialized by the
/// connection; there is exactly one logical writer.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reader half of an open transport. Consumed once per connection; a new
/// source requires a reconnect.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound text frame. `None` means the channel ended.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Factory for transport channels. `open` is called once per (re)connect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel, yielding split writer/reader halves.
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to `ws(s)://<host>:<port>/<path>`.
pub struct WsTransport {
    url: Url,
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a transport targeting the given endpoint.
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    /// Parse the endpoint string and create a transport.
    pub fn from_str(url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self::new(Url::parse(url)?, connect_timeout))
    }

    /// The endpoint this transport targets.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
        debug!(url = %self.url, "Opening WebSocket transport");

        let connect = connect_async(self.url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))??;

        let (sink, source) = stream.split();

        Ok((Box::new(WsSink { sink }), Box::new(WsSource { source })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.sink.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.send(Message::Close(None)).await?;
        self.sink.close().await?;
        Ok(())
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.source.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                // Tungstenite answers pings on the next write; nothing to do.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Close(_)) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// One connection to the remote endpoint: the transport factory, the single
/// serialized writer, the lifecycle state, and the negotiated capabilities.
///
/// Exclusively owned by the client; external components observe state through
/// the watch channel and never mutate it directly.
pub struct Connection {
    transport: Box<dyn Transport>,
    writer: Mutex<Option<Box<dyn FrameSink>>>,
    state: watch::Sender<ConnectionState>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    last_activity: std::sync::Mutex<Instant>,
    epoch: std::sync::atomic::AtomicU64,
}

impl Connection {
    /// Create a connection over the given transport. Starts disconnected.
    pub fn new(transport: Box<dyn Transport>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            writer: Mutex::new(None),
            state,
            capabilities: RwLock::new(None),
            last_activity: std::sync::Mutex::new(Instant::now()),
            epoch: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Generation of the current channel; advances on every open.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether calls may be sent right now.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Negotiated server capabilities, present after a handshake.
    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().await.clone()
    }

    /// Time since the last frame crossed this connection.
    pub fn idle_time(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Record activity on the connection.
    pub(crate) fn touch(&self) {
        if let Ok(mut t) = self.last_activity.lock() {
            *t = Instant::now();
        }
    }

    /// Open the transport channel and move to Connecting.
    ///
    /// Returns the reader half for the caller to pump; the connection stays
    /// in Connecting until the handshake completes and `mark_ready` is
    /// called. A socket-level failure moves straight to Failed.
    pub(crate) async fn open(&self) -> Result<Box<dyn FrameSource>, TransportError> {
        self.epoch.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connecting);

        match self.transport.open().await {
            Ok((sink, source)) => {
                *self.writer.lock().await = Some(sink);
                self.touch();
                Ok(source)
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Send one frame through the serialized writer.
    ///
    /// Allowed in Connecting (handshake frames) and Ready; any other state
    /// fails immediately rather than queuing.
    pub(crate) async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Ready
        ) {
            return Err(TransportError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(frame).await?;
        self.touch();
        Ok(())
    }

    /// Complete the handshake: store capabilities, move to Ready.
    pub(crate) async fn mark_ready(&self, capabilities: ServerCapabilities) {
        *self.capabilities.write().await = Some(capabilities);
        self.state.send_replace(ConnectionState::Ready);
    }

    /// Record a failure observed by the reader of a specific channel
    /// generation. A stale reader from a superseded channel never touches
    /// the current state.
    pub(crate) async fn mark_failed_for(&self, epoch: u64) {
        if self.epoch() == epoch {
            self.mark_failed().await;
        }
    }

    /// Record an irrecoverable transport failure.
    ///
    /// An explicit close in progress wins over a failure report; Closing
    /// always ends in Disconnected.
    pub(crate) async fn mark_failed(&self) {
        *self.capabilities.write().await = None;
        self.writer.lock().await.take();
        let current = self.state();
        if !matches!(
            current,
            ConnectionState::Closing | ConnectionState::Disconnected
        ) {
            self.state.send_replace(ConnectionState::Failed);
        }
    }

    /// Close the channel. Closing is always followed by Disconnected.
    pub(crate) async fn close(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        self.state.send_replace(ConnectionState::Closing);

        if let Some(mut sink) = self.writer.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing transport");
            }
        }

        *self.capabilities.write().await = None;
        self.state.send_replace(ConnectionState::Disconnected);
    }
}
