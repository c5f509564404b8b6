//! Gateway binary

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use llmrelay::config::Config;
use llmrelay::server;

#[derive(Debug, Parser)]
#[command(name = "gateway", about = "OpenAI-compatible multi-provider AI gateway")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "LLMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LLMRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,llmrelay=debug"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::load(cli.config.as_deref())?;
    let state = llmrelay::bootstrap(config).await?;
    server::run_server(state).await?;

    Ok(())
}
