//! # crawlbridge-core
//!
//! Shared foundation for Crawlbridge - the client bridge to a remote
//! content-extraction service.
//!
//! This crate provides:
//! - Configuration system (endpoint, call defaults, reconnect policy)
//! - Common error types

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Error, Result};
