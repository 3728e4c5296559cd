mod cluster;
mod collector;
mod config;
mod error;
mod export;
mod http;
mod kafka;
mod metrics;
#[cfg(test)]
mod test_strategies;

use crate::cluster::ClusterManager;
use crate::collector::{CollectionCycle, GroupCatalog};
use crate::config::{Config, ConfigOverrides, TimeUnit, TriggerMode};
use crate::export::prometheus::PrometheusExporter;
use crate::http::server::HttpServer;
use crate::kafka::KafkaConnector;
use crate::metrics::registry::MetricsRegistry;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kafka-offset-exporter")]
#[command(about = "Prometheus exporter for Kafka consumer group offsets and lag")]
#[command(version)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Kafka broker host
    #[arg(long)]
    kafka_host: Option<String>,

    /// Kafka broker port
    #[arg(long)]
    kafka_port: Option<u16>,

    /// HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP listen address
    #[arg(long)]
    http_host: Option<String>,

    /// Consumer groups whose whole id matches this pattern are skipped
    #[arg(long)]
    group_blacklist: Option<String>,

    /// Collection period, in `--unit`
    #[arg(long)]
    period: Option<u64>,

    #[arg(long, value_enum)]
    unit: Option<TimeUnit>,

    /// When to collect: on a timer, on every scrape, or both
    #[arg(long, value_enum)]
    mode: Option<TriggerMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            kafka_host: self.kafka_host.clone(),
            kafka_port: self.kafka_port,
            http_host: self.http_host.clone(),
            http_port: self.port,
            group_blacklist: self.group_blacklist.clone(),
            period: self.period,
            unit: self.unit,
            mode: self.mode,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Starting kafka-offset-exporter");

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_overrides(args.overrides());
    config.validate()?;
    info!(
        bootstrap_servers = %config.kafka.bootstrap_servers(),
        group_blacklist = %config.kafka.group_blacklist,
        poll_interval = ?config.exporter.poll_interval,
        mode = ?config.exporter.mode,
        "Configuration loaded"
    );

    let registry = Arc::new(MetricsRegistry::new());

    let catalog = GroupCatalog::new(config.kafka.compile_group_blacklist()?);
    let cycle = CollectionCycle::new(
        KafkaConnector::new(&config.kafka),
        catalog,
        Arc::clone(&registry),
    )?;
    let manager = Arc::new(ClusterManager::new(
        Arc::new(cycle),
        Arc::clone(&registry),
        config.exporter.poll_interval,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let collector_handle = config.exporter.mode.uses_timer().then(|| {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(Arc::clone(&manager).run(shutdown_rx))
    });

    let http_server = HttpServer::new(
        &config.exporter.http_host,
        config.exporter.http_port,
        PrometheusExporter::new(Arc::clone(&registry)),
        Arc::clone(&registry),
        Arc::clone(&manager),
        config.exporter.mode.uses_scrape(),
    );

    let shutdown_rx = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!(error = %e, "HTTP server error");
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    let _ = shutdown_tx.send(());

    let _ = server_handle.await;

    // A cycle blocked on the broker may outlive the request timeout
    if let Some(handle) = collector_handle {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(_) => info!("Collection loop stopped"),
            Err(_) => warn!("Timeout waiting for collection loop to stop"),
        }
    }

    info!("kafka-offset-exporter stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
