//! Invoke an arbitrary tool by name.

use anyhow::Context as _;
use futures::StreamExt;

use crawlbridge_client::ToolEvent;
use crawlbridge_core::Config;

pub async fn run(
    config: Config,
    name: &str,
    args: &str,
    stream: bool,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("arguments must be a JSON object")?;

    let client = super::connect(config).await?;

    let result = if stream {
        run_streaming(&client, name, args, output).await
    } else {
        match client.call(name, args, None).await {
            Ok(tool_output) => super::print_output(&tool_output, output),
            Err(e) => Err(e.into()),
        }
    };

    client.close().await;
    result
}

async fn run_streaming(
    client: &crawlbridge_client::CrawlClient,
    name: &str,
    args: serde_json::Value,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let mut stream = client.call_streaming(name, args, None).await?;

    while let Some(event) = stream.next().await {
        match event {
            ToolEvent::Chunk(chunk) => {
                println!("{}", serde_json::to_string(&chunk.payload)?);
            }
            ToolEvent::Completed(tool_output) => {
                super::print_output(&tool_output, output)?;
            }
            ToolEvent::Failed(e) => return Err(e.into()),
        }
    }

    Ok(())
}
