//! Client-bridge error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur at the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint URL could not be parsed.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket connection did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The remote side closed the channel.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Errors surfaced to callers of the client bridge.
///
/// Every variant carries enough detail to render to an end user or assert
/// on in a test. Nothing here is fatal to the hosting process.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable transport at call time (disconnected, reconnecting, or
    /// the tool catalogue has not been primed since the last reconnect).
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The transport failed while the call was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The local deadline elapsed before a reply arrived. The remote may
    /// still be executing the call; no cancellation is propagated.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// No tool with this name in the current catalogue.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Arguments failed structural validation against the tool schema.
    /// The remote endpoint was never contacted.
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// The remote endpoint reported a failure for this call.
    #[error("remote error (code {code}): {message}")]
    Remote { code: i64, message: String },

    /// Malformed or unparseable envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection-unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(msg.into())
    }

    /// Create an invalid-arguments error.
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a remote error from a reply's error object.
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Stable name of the failure kind, for display and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable(_) => "connection_unavailable",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Timeout(_) => "timeout",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Remote { .. } => "remote_tool_error",
            Self::Protocol(_) => "protocol_error",
            Self::Transport(_) => "transport_error",
            Self::Json(_) => "protocol_error",
        }
    }
}

impl From<ClientError> for crawlbridge_core::Error {
    fn from(e: ClientError) -> Self {
        crawlbridge_core::Error::Client(e.to_string())
    }
}
