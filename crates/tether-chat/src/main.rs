//! # Tether Chat
//!
//! Terminal client for a chat room: prints who is online and every message,
//! and sends each line typed on stdin.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tether-chat
//!
//! # Run with custom config
//! tether-chat --config /path/to/tether.toml
//!
//! # Run with environment variables
//! TETHER_ENDPOINT=wss://chat.example.com/socket TETHER_TOKEN=... tether-chat
//! ```

mod app;
mod config;
mod metrics;
mod render;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tether-chat", about = "Terminal chat room client")]
struct Args {
    /// Configuration file; defaults to the first tether.toml found.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout is the chat.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_chat=info,tether_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!("Joining {} on {}", config.topic, config.endpoint);

    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    app::run(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["tether-chat"]).unwrap();
        assert_eq!(args.config, None);

        let args = Args::try_parse_from(["tether-chat", "--config", "chat.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("chat.toml")));

        let args = Args::try_parse_from(["tether-chat", "--config=chat.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("chat.toml")));

        assert!(Args::try_parse_from(["tether-chat", "--config"]).is_err());
        assert!(Args::try_parse_from(["tether-chat", "--verbose"]).is_err());
    }
}
