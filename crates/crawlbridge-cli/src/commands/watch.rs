//! Hold the connection open under supervision and report state changes.

use std::sync::Arc;

use crawlbridge_client::{supervisor, CrawlClient};
use crawlbridge_core::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let policy = config.reconnect.clone();
    let client = Arc::new(CrawlClient::new(config)?);

    let mut state_rx = client.watch_state();
    let handle = supervisor::spawn(Arc::clone(&client), policy);

    if let Err(e) = client.connect().await {
        // The supervisor takes over from here.
        tracing::warn!(error = %e, "Initial connect failed; retrying in the background");
    }

    println!("Watching connection state; press Ctrl-C to stop.");
    println!("state: {}", client.state());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                let health = client.health().await;
                println!(
                    "state: {state} (tools: {}, idle: {:?})",
                    health.tool_count, health.idle
                );
            }
        }
    }

    handle.stop();
    client.close().await;
    Ok(())
}
