//! Wire protocol types.
//!
//! This module defines the JSON-RPC 2.0 envelopes and the MCP-shaped
//! structures exchanged with the remote extraction service: the initialize
//! handshake, tool discovery, and tool invocation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version sent during the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method name for the initialize handshake.
pub const METHOD_INITIALIZE: &str = "initialize";

/// Notification sent after a successful handshake.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";

/// Method name for tool discovery.
pub const METHOD_LIST_TOOLS: &str = "tools/list";

/// Method name for tool invocation.
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// Notification carrying a partial result for an in-flight request.
pub const METHOD_PROGRESS: &str = "notifications/progress";

/// Outbound request envelope.
///
/// Identifiers are numeric and monotonically increasing within a
/// connection's lifetime; allocation lives in the correlator.
#[derive(Debug, Clone, Serialize)]
pub struct Request<P> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: &'static str,
    /// Correlation identifier.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> Request<P> {
    /// Create a new request envelope.
    pub fn new(id: u64, method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound notification envelope (no id, no reply expected).
#[derive(Debug, Clone, Serialize)]
pub struct Notification<P> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> Notification<P> {
    /// Create a new notification envelope.
    pub fn new(method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried in a reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Raw inbound envelope, before classification.
#[derive(Debug, Deserialize)]
struct RawInbound {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
    method: Option<String>,
    params: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Reply to a correlated request.
    Reply {
        /// Correlation identifier matching the originating request.
        id: u64,
        /// Result payload or remote error.
        outcome: Result<Value, RpcError>,
    },
    /// Server-initiated notification.
    Notification {
        /// Method name.
        method: String,
        /// Notification parameters.
        params: Option<Value>,
    },
}

/// Parse an inbound frame into a reply or a notification.
///
/// Server-initiated requests (id plus method, no outcome) are classified
/// as notifications; a frame with neither id nor method is a protocol
/// error.
pub fn parse_inbound(text: &str) -> Result<Inbound, ClientError> {
    let raw: RawInbound = serde_json::from_str(text)
        .map_err(|e| ClientError::protocol(format!("unparseable envelope: {e}")))?;

    match (raw.id, raw.method) {
        // An id alongside a method and no outcome is a server-initiated
        // request, never a reply; treating it as one could spuriously
        // resolve a pending entry on an id collision.
        (Some(_), Some(method)) if raw.result.is_none() && raw.error.is_none() => {
            Ok(Inbound::Notification {
                method,
                params: raw.params,
            })
        }
        (Some(id), _) => {
            let outcome = match (raw.result, raw.error) {
                (Some(result), None) => Ok(result),
                (None, Some(error)) => Err(error),
                // A bare result of `null` serializes away under Option.
                (None, None) => Ok(Value::Null),
                (Some(_), Some(_)) => {
                    return Err(ClientError::protocol(format!(
                        "reply {id} carries both result and error"
                    )))
                }
            };
            Ok(Inbound::Reply { id, outcome })
        }
        (None, Some(method)) => Ok(Inbound::Notification {
            method,
            params: raw.params,
        }),
        (None, None) => Err(ClientError::protocol(
            "envelope has neither id nor method".to_string(),
        )),
    }
}

/// Client information sent during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "crawlbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Client capabilities for initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {}

/// Server capabilities negotiated during the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Logging capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

/// Tools capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits tool-list change notifications.
    #[serde(default)]
    pub list_changed: bool,
}

/// Logging capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client information.
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        }
    }
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server information.
    pub server_info: ServerInfo,
}

/// Result of the tools/list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// List of available tools.
    pub tools: Vec<ToolDescriptor>,
}

/// A remotely-exposed tool and its argument schema.
///
/// Produced by discovery; immutable once cached. A refresh supersedes the
/// whole catalogue, never individual descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique within a catalogue snapshot.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's named arguments.
    pub input_schema: Value,
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// MCP-shaped result of a tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content items returned by the tool.
    pub content: Vec<ContentItem>,
    /// Whether the tool execution resulted in an error.
    #[serde(default)]
    pub is_error: bool,
}

/// A single content item in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content, base64 encoded.
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource reference, possibly carrying base64 binary data (PDFs).
    Resource {
        /// Resource URI.
        uri: String,
        /// MIME type of the resource.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Inline text content.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Inline base64 binary content.
        #[serde(skip_serializing_if = "Option::is_none")]
        blob: Option<String>,
    },
}

/// Parameters of a progress notification for an in-flight request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Correlation identifier of the originating request.
    pub request_id: u64,
    /// Chunk sequence number, increasing from zero.
    pub sequence: u64,
    /// Partial payload.
    pub chunk: Value,
}
