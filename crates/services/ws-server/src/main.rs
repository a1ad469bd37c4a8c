//! Matchpoint server binary entry point
//!
//! Starts the WebSocket coordination server.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8765, HTTP collaborators on localhost)
//! cargo run -p matchpoint-server
//!
//! # Tighter latency targets, JSON logs
//! cargo run -p matchpoint-server -- --preset low-latency --log-format json
//!
//! # No external services: scripted collaborators answer every call
//! cargo run -p matchpoint-server -- --offline --seed 42
//! ```

use anyhow::Context;
use clap::Parser;
use matchpoint_core::{Collaborators, Coordinator, CoordinatorConfig};
use matchpoint_websocket::WebSocketServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Matchpoint Server
///
/// Real-time multimodal stream coordination over WebSocket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (overrides the preset)
    #[arg(short, long, env = "MATCHPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Built-in configuration preset
    #[arg(long, default_value = "default", env = "MATCHPOINT_PRESET")]
    preset: Preset,

    /// Address to listen on
    #[arg(short, long, env = "MATCHPOINT_BIND")]
    bind: Option<SocketAddr>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, env = "MATCHPOINT_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Log output format
    #[arg(long, default_value = "text", env = "MATCHPOINT_LOG_FORMAT")]
    log_format: LogFormat,

    /// Use scripted in-process collaborators instead of HTTP services
    #[arg(long, env = "MATCHPOINT_OFFLINE")]
    offline: bool,

    /// Seed for the controller's exploration jitter
    #[arg(long, env = "MATCHPOINT_SEED")]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Preset {
    Default,
    LowLatency,
    HighAccuracy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("matchpoint-worker")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_addr,
        preset = ?args.preset,
        offline = args.offline,
        audio_target_ms = config.latency.audio_ms,
        visual_target_ms = config.latency.visual_ms,
        "Matchpoint server starting"
    );

    let collaborators = if args.offline {
        warn!("Offline mode: collaborator calls are answered by scripted stand-ins");
        Collaborators::scripted()
    } else {
        Collaborators::http(&config.collaborators)
            .context("failed to build collaborator clients")?
    };

    let bind_addr = config.server.bind_addr;
    let coordinator = Coordinator::new(config, collaborators)?;
    coordinator.start_background_tasks();

    let server = WebSocketServer::bind(bind_addr, coordinator)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    server.serve_with_shutdown(shutdown_signal()).await?;
    info!("Matchpoint server stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => match args.preset {
            Preset::Default => CoordinatorConfig::default(),
            Preset::LowLatency => CoordinatorConfig::low_latency(),
            Preset::HighAccuracy => CoordinatorConfig::high_accuracy(),
        },
    };

    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
