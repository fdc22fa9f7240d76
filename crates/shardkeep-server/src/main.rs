//! shardkeep - Node daemon for unused shard cleanup and store throttling
//!
//! Polls a TOML routing file and a YAML settings file and feeds them to the
//! cluster and settings services. Shard data that is fully started on other
//! nodes is removed from this node's data paths; `store.throttle.*` updates
//! are applied to the shared store rate limiter.
//!
//! Usage:
//!   shardkeep [OPTIONS]

mod config;
mod node;

use clap::Parser;
use config::NodeConfig;
use node::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardkeep")]
#[command(author, version, about = "Remove unused shard data and throttle store I/O")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "shardkeep.yml")]
    config: PathBuf,

    /// Data path (overrides config, may be repeated)
    #[arg(short, long)]
    data_dir: Vec<PathBuf>,

    /// Node id (overrides config)
    #[arg(short, long)]
    node_id: Option<String>,

    /// Routing file (overrides config)
    #[arg(short, long)]
    routing: Option<PathBuf>,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    generate_config: bool,

    /// Reload once and exit
    #[arg(long)]
    once: bool,
}

fn init_logging(config: &NodeConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.logging.show_target)
        .with_thread_ids(config.logging.show_thread_ids)
        .with_file(config.logging.show_location)
        .with_line_number(config.logging.show_location)
        .init();
}

/// One pass over both sources. Errors are logged and retried next pass.
fn reload(node: &Node) {
    if let Err(e) = node.reload_settings() {
        warn!("Failed to apply settings: {:#}", e);
    }
    if let Err(e) = node.reload_routing() {
        warn!("Failed to apply routing: {:#}", e);
    }
}

async fn poll(node: Arc<Node>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(node.config().poll_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let node = Arc::clone(&node);
                if let Err(e) = tokio::task::spawn_blocking(move || reload(&node)).await {
                    error!("Reload task panicked: {}", e);
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("SIGINT received, shutting down gracefully...");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        NodeConfig::write_default(&cli.config)?;
        println!("Generated default configuration: {}", cli.config.display());
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        NodeConfig::from_file(&cli.config)?
    } else {
        NodeConfig::default()
    };

    if !cli.data_dir.is_empty() {
        config.node.data_paths = cli.data_dir;
    }
    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }
    if let Some(routing) = cli.routing {
        config.cluster.routing_file = Some(routing);
    }

    init_logging(&config);

    info!("Starting shardkeep v{}", env!("CARGO_PKG_VERSION"));
    info!("Node id: {}", config.node.id);
    info!("Data paths: {:?}", config.node.data_paths);
    if let Some(routing) = &config.cluster.routing_file {
        info!("Routing file: {:?}", routing);
    }
    if let Some(settings) = &config.settings.file {
        info!("Settings file: {:?}", settings);
    }

    let node = Arc::new(Node::build(config)?);
    let throttle = node.rate_limiting().config();
    info!(
        "Store throttle: type [{}], max_bytes_per_sec [{}]",
        throttle.mode, throttle.max_bytes_per_sec
    );
    node.start()?;

    if cli.once {
        let pass = Arc::clone(&node);
        tokio::task::spawn_blocking(move || reload(&pass)).await?;
    } else {
        let shutdown = CancellationToken::new();
        let poller = tokio::spawn(poll(Arc::clone(&node), shutdown.clone()));

        shutdown_signal().await;
        shutdown.cancel();
        if let Err(e) = poller.await {
            error!("Poller task failed: {}", e);
        }
    }

    info!("{} index(es) open at shutdown", node.indices_service().len());
    node.stop()?;
    info!("Shutdown complete");
    Ok(())
}
