//! Render a page to a binary artifact (screenshot or PDF).

use anyhow::Context as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

use crawlbridge_core::Config;

pub async fn run(config: Config, tool: &str, url: &str, output: &str) -> anyhow::Result<()> {
    let client = super::connect(config).await?;
    let result = client.call(tool, json!({ "url": url }), None).await;
    client.close().await;

    let tool_output = result?;

    // Preferred shape: a typed binary payload. Some deployments instead
    // return a JSON document with the bytes base64-encoded under a field
    // named after the tool.
    if let Some((data, mime_type)) = tool_output.binary() {
        std::fs::write(output, data).with_context(|| format!("failed to write {output}"))?;
        eprintln!("Wrote {} bytes ({mime_type}) to {output}", data.len());
        return Ok(());
    }

    if let Some(encoded) = tool_output
        .document()
        .and_then(|d| d.get(tool))
        .and_then(|v| v.as_str())
    {
        let data = BASE64
            .decode(encoded.as_bytes())
            .context("remote returned invalid base64")?;
        std::fs::write(output, &data).with_context(|| format!("failed to write {output}"))?;
        eprintln!("Wrote {} bytes to {output}", data.len());
        return Ok(());
    }

    anyhow::bail!("remote reply carried no binary payload");
}
