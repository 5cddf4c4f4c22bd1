//! Tool catalogue cache.
//!
//! The registry holds the most recently discovered catalogue of remote
//! tools. Refresh replaces the whole catalogue atomically; descriptors are
//! never mutated in place. A reconnect invalidates the catalogue outright
//! so a stale schema from a previous remote process is never served.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ClientError;
use crate::protocol::ToolDescriptor;

struct Catalogue {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    generation: u64,
}

/// Cached, refreshable catalogue of remotely-exposed tools.
pub struct ToolRegistry {
    catalogue: RwLock<Option<Catalogue>>,
    next_generation: std::sync::atomic::AtomicU64,
}

impl ToolRegistry {
    /// Create an empty (unprimed) registry.
    pub fn new() -> Self {
        Self {
            catalogue: RwLock::new(None),
            next_generation: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Whether a catalogue has been installed since the last invalidation.
    pub async fn is_primed(&self) -> bool {
        self.catalogue.read().await.is_some()
    }

    /// Generation of the current catalogue, if primed.
    ///
    /// Each install gets a fresh generation, so a post-reconnect refresh is
    /// observable even when the contents are identical.
    pub async fn generation(&self) -> Option<u64> {
        self.catalogue.read().await.as_ref().map(|c| c.generation)
    }

    /// Look up a tool by name.
    ///
    /// An unprimed registry (right after a reconnect, before the forced
    /// refresh lands) reports the connection as unavailable rather than
    /// pretending the tool does not exist.
    pub async fn lookup(&self, name: &str) -> Result<Arc<ToolDescriptor>, ClientError> {
        let catalogue = self.catalogue.read().await;
        match catalogue.as_ref() {
            None => Err(ClientError::unavailable(
                "tool catalogue not primed".to_string(),
            )),
            Some(c) => c
                .tools
                .get(name)
                .cloned()
                .ok_or_else(|| ClientError::ToolNotFound(name.to_string())),
        }
    }

    /// Snapshot of all descriptors in the current catalogue.
    pub async fn tools(&self) -> Vec<Arc<ToolDescriptor>> {
        let catalogue = self.catalogue.read().await;
        match catalogue.as_ref() {
            None => Vec::new(),
            Some(c) => {
                let mut tools: Vec<_> = c.tools.values().cloned().collect();
                tools.sort_by(|a, b| a.name.cmp(&b.name));
                tools
            }
        }
    }

    /// Number of tools in the current catalogue.
    pub async fn len(&self) -> usize {
        self.catalogue
            .read()
            .await
            .as_ref()
            .map_or(0, |c| c.tools.len())
    }

    /// Whether the catalogue is empty or unprimed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace the catalogue wholesale with a freshly discovered one.
    pub async fn install(&self, descriptors: Vec<ToolDescriptor>) {
        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let tools: HashMap<String, Arc<ToolDescriptor>> = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(d)))
            .collect();

        debug!(count = tools.len(), generation, "Installing tool catalogue");

        *self.catalogue.write().await = Some(Catalogue { tools, generation });
    }

    /// Drop the catalogue entirely. Lookups fail as unavailable until the
    /// next install.
    pub async fn invalidate(&self) {
        let had = self.catalogue.write().await.take().is_some();
        if had {
            debug!("Tool catalogue invalidated");
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
