//! List the remote tool catalogue.

use crawlbridge_core::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let client = super::connect(config).await?;

    let tools = client.tools().await;
    if tools.is_empty() {
        println!("No tools exposed by the remote service.");
    } else {
        for tool in &tools {
            let required: Vec<&str> = tool
                .input_schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();

            match &tool.description {
                Some(description) => println!("{}  -  {}", tool.name, description),
                None => println!("{}", tool.name),
            }
            if !required.is_empty() {
                println!("    required: {}", required.join(", "));
            }
        }
    }

    client.close().await;
    Ok(())
}
