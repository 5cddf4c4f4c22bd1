//! Diagnostic command: configuration and connectivity checks.

use crawlbridge_client::CrawlClient;
use crawlbridge_core::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (defaults and environment apply)");
    }

    // Validate configuration
    let validation = config.validate();
    println!("\nConfiguration:");
    if validation.is_ok() {
        println!("  ✓ Valid");
    }
    for issue in &validation.issues {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }

    println!("\nEndpoint: {}", config.endpoint.url);
    if let Some(discovery) = &config.endpoint.discovery_url {
        println!("Discovery endpoint: {discovery}");
    }

    // Check connectivity
    let client = CrawlClient::new(config)?;
    match client.connect().await {
        Ok(()) => {
            let health = client.health().await;
            println!("  ✓ Connected (state: {})", health.state);
            println!("  ✓ {} tools discovered:", health.tool_count);
            for tool in client.tools().await {
                println!("      {}", tool.name);
            }
            client.close().await;
        }
        Err(e) => {
            println!("  ✗ Connection failed: {e}");
        }
    }

    Ok(())
}
