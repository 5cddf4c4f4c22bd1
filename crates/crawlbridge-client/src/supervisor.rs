//! Reconnection supervision.
//!
//! The supervisor observes connection state transitions and, on an
//! unexpected drop, reconnects with exponential backoff and jitter.
//! `CrawlClient::connect` re-primes the tool catalogue as part of every
//! successful reconnect, so a stale catalogue from a previous remote
//! process is never served. Tool calls are never retried here; retry is
//! a connection-level concern only, keeping at-most-once call semantics
//! visible to callers.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crawlbridge_core::config::ReconnectConfig;

use crate::client::CrawlClient;
use crate::transport::ConnectionState;

/// Backoff delay for a given attempt index (0-based).
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let pow = config.backoff_multiplier.powi(attempt as i32);
    let mut delay_ms = (config.initial_backoff_ms as f64 * pow) as u64;
    if delay_ms > config.backoff_cap_ms {
        delay_ms = config.backoff_cap_ms;
    }

    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter > 0.0 {
        let mut rng = rand::rng();
        let scale: f64 = rng.random_range(-jitter..=jitter);
        let adjusted = (delay_ms as f64 * (1.0 + scale)).round().max(0.0) as u64;
        return Duration::from_millis(adjusted);
    }

    Duration::from_millis(delay_ms)
}

/// Handle to a running supervisor task.
pub struct SupervisorHandle {
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Stop supervising. In-flight calls are unaffected.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the supervisor task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a supervisor for the given client.
///
/// Reacts only to transitions into `Failed` or `Disconnected` that were not
/// caused by an explicit `close()`.
pub fn spawn(client: Arc<CrawlClient>, policy: ReconnectConfig) -> SupervisorHandle {
    let mut state_rx = client.watch_state();

    let task = tokio::spawn(async move {
        loop {
            if state_rx.changed().await.is_err() {
                break;
            }

            let state = *state_rx.borrow_and_update();
            if !matches!(
                state,
                ConnectionState::Failed | ConnectionState::Disconnected
            ) {
                continue;
            }

            if client.is_closing() {
                debug!("Connection closed explicitly; not reconnecting");
                continue;
            }

            reconnect_with_backoff(&client, &policy).await;
        }
    });

    SupervisorHandle { task }
}

async fn reconnect_with_backoff(client: &CrawlClient, policy: &ReconnectConfig) {
    let mut attempt: u32 = 0;

    loop {
        if client.is_closing() {
            return;
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                warn!(attempts = max, "Giving up on reconnection");
                return;
            }
        }

        let delay = backoff_delay(policy, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
        tokio::time::sleep(delay).await;

        match client.connect().await {
            Ok(()) => {
                info!(attempt, "Reconnected");
                return;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Reconnect attempt failed");
                attempt += 1;
            }
        }
    }
}
