use clap::Parser;
use smtp_bridge::bridge::shutdown_signal;
use smtp_bridge::config::{Config, LoggingConfig, DEFAULT_CONFIG_PATH};
use smtp_bridge::{Bridge, ProviderRegistry};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// SMTP to API bridge
#[derive(Parser)]
#[command(name = "smtp-bridge", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// SMTP port to listen on
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// SMTP host to listen on
    #[arg(short = 'H', long)]
    host: Option<String>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        "compact" => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_file(&cli.config)?;
    if let Some(port) = cli.port {
        config.smtp.port = port;
    }
    if let Some(host) = cli.host {
        config.smtp.host = host;
    }

    init_logging(&config.logging);
    info!("Starting smtp-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", cli.config.display());
    info!("  SMTP listening on: {}", config.listen_addr());
    info!("  Provider: {}", config.sender.provider);
    info!("  Dispatch interval: {}s", config.dispatch_interval);
    if config.dry_mode {
        info!("  Dry mode enabled, nothing will be sent");
    }

    let bridge = Bridge::bind(config, &ProviderRegistry::with_defaults()).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signals: {}", e);
        }
        signal_token.cancel();
    });

    bridge.run(shutdown).await?;
    Ok(())
}
