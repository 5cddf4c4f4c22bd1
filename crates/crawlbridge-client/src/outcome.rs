//! Typed call outcomes.
//!
//! A raw reply envelope becomes a `ToolOutput` of typed payloads. Binary
//! payloads (screenshots, PDFs) are base64-decoded into opaque bytes and
//! never assumed to be text; text that is itself a JSON document is
//! surfaced structurally, the way the original service returns crawl
//! results as JSON blobs.

use std::pin::Pin;
use std::task::{Context, Poll};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::correlator::StreamChunk;
use crate::error::ClientError;
use crate::protocol::{CallToolResult, ContentItem};

/// One payload produced by a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// Plain text (markdown, HTML, logs).
    Text(String),
    /// Structured JSON document.
    Document(Value),
    /// Opaque binary blob with its MIME type.
    Binary {
        /// Decoded bytes.
        data: Vec<u8>,
        /// MIME type, e.g. `image/png` or `application/pdf`.
        mime_type: String,
    },
}

/// Successful result of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Payloads in the order the remote produced them.
    pub content: Vec<ToolPayload>,
}

impl ToolOutput {
    /// First text payload, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|p| match p {
            ToolPayload::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// First structured document, if any.
    pub fn document(&self) -> Option<&Value> {
        self.content.iter().find_map(|p| match p {
            ToolPayload::Document(value) => Some(value),
            _ => None,
        })
    }

    /// First binary payload, if any.
    pub fn binary(&self) -> Option<(&[u8], &str)> {
        self.content.iter().find_map(|p| match p {
            ToolPayload::Binary { data, mime_type } => {
                Some((data.as_slice(), mime_type.as_str()))
            }
            _ => None,
        })
    }
}

/// Decode the raw result value of a tools/call reply.
///
/// Two shapes are accepted: the MCP content list, and a bare JSON result
/// (the original service replies with plain JSON objects for most tools).
pub fn decode_call_result(value: Value) -> Result<ToolOutput, ClientError> {
    let is_content_list = value
        .get("content")
        .map(Value::is_array)
        .unwrap_or(false);

    if !is_content_list {
        let payload = match value {
            Value::String(text) => ToolPayload::Text(text),
            other => ToolPayload::Document(other),
        };
        return Ok(ToolOutput {
            content: vec![payload],
        });
    }

    let result: CallToolResult = serde_json::from_value(value)
        .map_err(|e| ClientError::protocol(format!("malformed tool result: {e}")))?;

    if result.is_error {
        let message = result
            .content
            .iter()
            .find_map(|item| match item {
                ContentItem::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "tool reported an error".to_string());
        return Err(ClientError::remote(0, message));
    }

    let mut content = Vec::with_capacity(result.content.len());
    for item in result.content {
        content.push(decode_content_item(item)?);
    }

    Ok(ToolOutput { content })
}

fn decode_content_item(item: ContentItem) -> Result<ToolPayload, ClientError> {
    match item {
        ContentItem::Text { text } => Ok(decode_text(text)),
        ContentItem::Image { data, mime_type } => {
            let data = BASE64
                .decode(data.as_bytes())
                .map_err(|e| ClientError::protocol(format!("invalid base64 image: {e}")))?;
            Ok(ToolPayload::Binary { data, mime_type })
        }
        ContentItem::Resource {
            uri,
            mime_type,
            text,
            blob,
        } => {
            if let Some(blob) = blob {
                let data = BASE64
                    .decode(blob.as_bytes())
                    .map_err(|e| ClientError::protocol(format!("invalid base64 resource: {e}")))?;
                Ok(ToolPayload::Binary {
                    data,
                    mime_type: mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
                })
            } else if let Some(text) = text {
                Ok(decode_text(text))
            } else {
                Ok(ToolPayload::Document(serde_json::json!({
                    "uri": uri,
                    "mimeType": mime_type,
                })))
            }
        }
    }
}

/// Text that parses as a JSON object or array is surfaced structurally.
fn decode_text(text: String) -> ToolPayload {
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => ToolPayload::Document(value),
        _ => ToolPayload::Text(text),
    }
}

/// One event in a streaming call.
#[derive(Debug)]
pub enum ToolEvent {
    /// A partial payload delivered before the terminal outcome.
    Chunk(StreamChunk),
    /// The call completed; always the last event on success.
    Completed(ToolOutput),
    /// The call failed; always the last event on failure.
    Failed(ClientError),
}

impl ToolEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Finite sequence of `ToolEvent`s: zero or more chunks, then exactly one
/// terminal event.
pub struct ToolStream {
    rx: mpsc::UnboundedReceiver<ToolEvent>,
}

impl ToolStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ToolEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for ToolStream {
    type Item = ToolEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
