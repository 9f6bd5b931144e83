use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kustomux_core::{ClusterMapping, LogLevel, RouterSettings};
use kustomux_mcp::{
    ChildCommand, DispatchRouter, EndpointSupervisor, HealthLoop, RouterBridge, ToolMerger,
};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kustomux",
    about = "Multiplexing MCP router for fleets of Kusto cluster servers",
    version
)]
struct Cli {
    /// Cluster mapping, `URL` or `URL=IDENTITY`; repeatable
    #[arg(long = "mapping", value_name = "URL[=IDENTITY]")]
    mappings: Vec<String>,

    /// Ask downstream servers for read-only behavior (default)
    #[arg(long, overrides_with = "no_read_only")]
    read_only: bool,

    /// Negate --read-only
    #[arg(long, overrides_with = "read_only")]
    no_read_only: bool,

    /// Seconds between health-check ticks
    #[arg(long = "ping-interval", value_name = "SECS", default_value_t = 60)]
    ping_interval: u64,

    /// Seconds before a single ping times out
    #[arg(long = "ping-timeout", value_name = "SECS", default_value_t = 10)]
    ping_timeout: u64,

    /// Ceiling in seconds for the reconnect backoff
    #[arg(long = "max-reconnect-backoff", value_name = "SECS", default_value_t = 300)]
    max_reconnect_backoff: u64,

    /// Log verbosity (debug|info|warn|error)
    #[arg(long = "log-level", default_value = "info")]
    log_level: LogLevel,
}

impl Cli {
    fn settings(&self) -> RouterSettings {
        RouterSettings {
            ping_interval_secs: self.ping_interval,
            ping_timeout_secs: self.ping_timeout,
            max_reconnect_backoff_secs: self.max_reconnect_backoff,
            read_only: !self.no_read_only,
            log_level: self.log_level,
        }
    }
}

/// Install the tracing subscriber: a stderr layer (stdout belongs to the
/// protocol) and, when a `logs/` directory can be created, a file mirror.
fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    let log_dir = PathBuf::from("logs");
    let file_layer = std::fs::create_dir_all(&log_dir).ok().map(|_| {
        tracing_subscriber::fmt::layer()
            .with_writer(tracing_appender::rolling::never(log_dir, "kustomux.log"))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("SIGINT received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    if cli.mappings.is_empty() {
        error!("no cluster mappings provided; pass at least one --mapping URL[=IDENTITY]");
        std::process::exit(1);
    }

    let mut mappings = Vec::new();
    for raw in &cli.mappings {
        match ClusterMapping::parse(raw) {
            Ok(mapping) => mappings.push(mapping),
            Err(e) => {
                error!(mapping = %raw, error = %e, "invalid cluster mapping");
                std::process::exit(1);
            }
        }
    }

    let settings = cli.settings();

    // Session banner, mirrored into logs/ when the file layer is active.
    info!(
        version = env!("CARGO_PKG_VERSION"),
        clusters = mappings.len(),
        read_only = settings.read_only,
        ping_interval_secs = settings.ping_interval_secs,
        ping_timeout_secs = settings.ping_timeout_secs,
        max_reconnect_backoff_secs = settings.max_reconnect_backoff_secs,
        "kustomux session starting"
    );

    let supervisor = EndpointSupervisor::new(settings.clone(), ChildCommand::from_env());
    let connected = supervisor.initialize_all(&mappings).await;
    if connected == 0 {
        error!("no endpoints connected after initialization");
        supervisor.shutdown_all().await;
        std::process::exit(1);
    }
    info!(connected, configured = mappings.len(), "endpoints initialized");

    let merger = Arc::new(ToolMerger::new());
    merger.refresh(&supervisor).await;
    if merger.snapshot().await.is_empty() {
        error!("no tools discovered from any endpoint");
        supervisor.shutdown_all().await;
        std::process::exit(1);
    }

    let router = DispatchRouter::new(supervisor.clone(), merger.clone());
    let health = HealthLoop::new(supervisor.clone(), settings.clone());
    health.start().await;

    let bridge = RouterBridge::new(merger, router);

    tokio::select! {
        result = bridge.run() => {
            match result {
                Ok(()) => info!("upstream transport closed"),
                Err(e) => error!(error = %e, "upstream bridge failed"),
            }
        }
        _ = shutdown_signal() => {}
    }

    health.stop().await;
    supervisor.shutdown_all().await;
    info!("shutdown complete");

    Ok(())
}
