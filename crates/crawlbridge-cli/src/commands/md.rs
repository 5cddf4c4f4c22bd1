//! Extract a page as markdown.

use serde_json::{json, Value};

use crawlbridge_core::Config;

pub async fn run(
    config: Config,
    url: &str,
    filter: Option<String>,
    query: Option<String>,
    cache: Option<String>,
) -> anyhow::Result<()> {
    let mut args = json!({ "url": url });
    if let Some(filter) = filter {
        args["f"] = Value::String(filter);
    }
    if let Some(query) = query {
        args["q"] = Value::String(query);
    }
    if let Some(cache) = cache {
        args["c"] = Value::String(cache);
    }

    let client = super::connect(config).await?;
    let result = client.call("md", args, None).await;
    client.close().await;

    let output = result?;

    // The service replies either with the markdown text itself or with a
    // JSON document carrying a "markdown" field.
    if let Some(text) = output.text() {
        println!("{text}");
    } else if let Some(markdown) = output.document().and_then(|d| d.get("markdown")) {
        match markdown {
            Value::String(text) => println!("{text}"),
            other => println!("{}", serde_json::to_string_pretty(other)?),
        }
    } else {
        super::print_output(&output, None)?;
    }

    Ok(())
}
