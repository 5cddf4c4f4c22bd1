//! CLI command implementations.

use anyhow::Context as _;

use crawlbridge_client::{CrawlClient, ToolOutput, ToolPayload};
use crawlbridge_core::Config;

pub mod call;
pub mod doctor;
pub mod md;
pub mod render;
pub mod tools;
pub mod watch;

/// Build a client and connect it, with a readable error on failure.
pub async fn connect(config: Config) -> anyhow::Result<CrawlClient> {
    let endpoint = config.endpoint.url.clone();
    let client = CrawlClient::new(config)?;
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    Ok(client)
}

/// Print a tool output: text to stdout, documents as pretty JSON, binary
/// payloads to `output` (or a size report when no path was given).
pub fn print_output(output: &ToolOutput, binary_path: Option<&str>) -> anyhow::Result<()> {
    for payload in &output.content {
        match payload {
            ToolPayload::Text(text) => println!("{text}"),
            ToolPayload::Document(value) => {
                println!("{}", serde_json::to_string_pretty(value)?)
            }
            ToolPayload::Binary { data, mime_type } => match binary_path {
                Some(path) => {
                    std::fs::write(path, data)
                        .with_context(|| format!("failed to write {path}"))?;
                    eprintln!("Wrote {} bytes ({mime_type}) to {path}", data.len());
                }
                None => {
                    eprintln!(
                        "Binary payload: {} bytes ({mime_type}); pass --output to save it",
                        data.len()
                    );
                }
            },
        }
    }
    Ok(())
}
