//! hypersignal: signal-plan coordinator for HyperQube fleet directives
//!
//! Follows directives and acknowledgements on the configured relays, derives
//! the current signal plan and serves it over HTTP.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use hypersignal::cli::{execute, Commands};
use hypersignal::config::Config;
use hypersignal::service::{self, AppContext};

#[derive(Parser)]
#[command(name = "hypersignal")]
#[command(about = "Signal-plan coordinator for HyperQube fleet directives")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "HYPERSIGNAL_CONFIG", default_value = "hypersignal.toml")]
    config: String,

    /// HTTP API port (overrides config file)
    #[arg(long, env = "HYPERSIGNAL_HTTP_PORT")]
    http_port: Option<u16>,

    /// Inactivity timeout in seconds (overrides config file)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Extra special relay (repeatable)
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Log filter, e.g. "debug" or "hypersignal=trace"
    #[arg(long, env = "HYPERSIGNAL_LOG", default_value = "hypersignal=info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.log_level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load or create default config
    let mut config = if Path::new(&cli.config).exists() {
        info!("Config file: {}", cli.config);
        Config::load(Path::new(&cli.config))?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(timeout) = cli.timeout_secs {
        config.signal.inactivity_timeout_secs = timeout;
    }
    for relay in cli.relays {
        if !config.relays.special_relays.contains(&relay) {
            config.relays.special_relays.push(relay);
        }
    }
    config.validate()?;

    info!(
        signers = config.signal.authorized_pubkeys.len(),
        timeout_secs = config.signal.inactivity_timeout_secs,
        "Starting hypersignal"
    );

    let ctx = Arc::new(AppContext::new(config));

    match cli.command {
        None | Some(Commands::Serve) => service::run(ctx).await,
        Some(command) => {
            let output = execute(ctx, command).await?;
            println!("{}", output);
            Ok(())
        }
    }
}
