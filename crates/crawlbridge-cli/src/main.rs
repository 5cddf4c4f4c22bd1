//! # crawlbridge-cli
//!
//! Command-line interface for the crawlbridge content-extraction client.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crawlbridge_core::Config;

mod commands;

/// crawlbridge - client bridge to a remote content-extraction service
#[derive(Parser)]
#[command(name = "crawlbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Override the service endpoint URL (ws:// or wss://)
    #[arg(short, long, value_name = "URL")]
    endpoint: Option<String>,

    /// Override the per-call timeout in seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools exposed by the remote service
    Tools,
    /// Call a tool by name with JSON arguments
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Consume the reply as a stream of chunks
        #[arg(short, long)]
        stream: bool,
        /// Write a binary payload to this path instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<String>,
    },
    /// Extract a page as markdown
    Md {
        /// Page URL
        url: String,
        /// Content filter (fit, raw, bm25, llm)
        #[arg(short, long)]
        filter: Option<String>,
        /// Query for query-aware filters
        #[arg(short, long)]
        query: Option<String>,
        /// Cache mode
        #[arg(short, long)]
        cache: Option<String>,
    },
    /// Capture a full-page screenshot
    Screenshot {
        /// Page URL
        url: String,
        /// Output file
        #[arg(short, long, default_value = "screenshot.png")]
        output: String,
    },
    /// Render a page as PDF
    Pdf {
        /// Page URL
        url: String,
        /// Output file
        #[arg(short, long, default_value = "page.pdf")]
        output: String,
    },
    /// Hold the connection open and report state transitions
    Watch,
    /// Show the effective configuration
    Config,
    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration and apply command-line overrides
    let mut config = Config::load_validated()?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint.url = endpoint;
    }
    if let Some(timeout) = cli.timeout {
        config.calls.default_timeout_secs = timeout;
    }

    match cli.command {
        Commands::Tools => {
            commands::tools::run(config).await?;
        }
        Commands::Call {
            name,
            args,
            stream,
            output,
        } => {
            commands::call::run(config, &name, &args, stream, output.as_deref()).await?;
        }
        Commands::Md {
            url,
            filter,
            query,
            cache,
        } => {
            commands::md::run(config, &url, filter, query, cache).await?;
        }
        Commands::Screenshot { url, output } => {
            commands::render::run(config, "screenshot", &url, &output).await?;
        }
        Commands::Pdf { url, output } => {
            commands::render::run(config, "pdf", &url, &output).await?;
        }
        Commands::Watch => {
            commands::watch::run(config).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            commands::doctor::run(config).await?;
        }
    }

    Ok(())
}
