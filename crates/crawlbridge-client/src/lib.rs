//! # crawlbridge-client
//!
//! Protocol client bridge to a remote content-extraction service.
//!
//! This crate provides:
//! - WebSocket transport with an explicit connection state machine
//! - Request/reply correlation over one shared connection
//! - A cached, refreshable catalogue of remotely-exposed tools
//! - Schema-validated tool invocation with typed outcomes
//! - A reconnection supervisor with backoff and catalogue re-priming

pub mod client;
pub mod correlator;
pub mod error;
pub mod outcome;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod supervisor;
pub mod transport;

pub use client::CrawlClient;
pub use error::{ClientError, TransportError};
pub use outcome::{ToolEvent, ToolOutput, ToolPayload, ToolStream};
pub use protocol::ToolDescriptor;
pub use registry::ToolRegistry;
pub use supervisor::SupervisorHandle;
pub use transport::{ConnectionState, Transport, WsTransport};
