//! Seamark - Service discovery cache and watch daemon for Consul

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::Config;
use seamark_consul::{ConsulClient, ConsulHeartbeat};
use seamark_core::{
    ChangeListener, ClusterKey, HeartbeatReporter, ServiceDirectory, ServiceEndpoint,
};

/// Seamark - Service discovery cache and watch daemon for Consul
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/seamark.toml", env = "SEAMARK_CONFIG")]
    config: String,

    /// Protocol advertised for discovered endpoints
    #[arg(long, env = "SEAMARK_PROTOCOL")]
    protocol: Option<String>,

    /// Services to watch
    services: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging.level);

    info!("Starting Seamark v{}", env!("CARGO_PKG_VERSION"));

    // Start the Prometheus exporter
    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.listen.parse().with_context(|| {
            format!("Invalid metrics listen address: {}", config.metrics.listen)
        })?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics available at http://{}/metrics", addr);
    }

    // Connect to the Consul agent
    let client = Arc::new(ConsulClient::new(config.consul.clone())?);

    // TTL heartbeating for instances registered through this process
    let heartbeat: Option<Arc<dyn HeartbeatReporter>> = if config.consul.check_ttl_enabled() {
        let heartbeat = ConsulHeartbeat::start(client.clone());
        Some(Arc::new(heartbeat))
    } else {
        None
    };

    // Pin the advertised protocol before the directory copies the discovery
    // config; loops claimed by resolve must use the cluster key the
    // subscriptions below are registered under
    let protocol = config.select_protocol(args.protocol);

    // Create the service directory
    let directory = ServiceDirectory::new(client, heartbeat, config.discovery.clone());

    // Watch the requested services
    if args.services.is_empty() {
        warn!("No services given on the command line, nothing to watch");
    }

    for service in &args.services {
        let endpoints = directory.resolve(service).await;
        if endpoints.is_empty() {
            warn!("No available instances of {} yet", service);
        } else {
            for endpoint in endpoints.iter() {
                info!("{} -> {}", service, endpoint.to_uri());
            }
        }
        let cluster = ClusterKey::new(protocol.as_str(), service.as_str());
        directory.subscribe(&cluster, "seamark-watch", Arc::new(EndpointLogger));
    }

    shutdown_signal().await;

    info!("Seamark stopped");
    Ok(())
}

/// Logs every endpoint change pushed by the directory.
struct EndpointLogger;

impl ChangeListener for EndpointLogger {
    fn endpoints_changed(
        &self,
        cluster: &ClusterKey,
        endpoints: &[ServiceEndpoint],
    ) -> anyhow::Result<()> {
        info!("{} changed, {} instance(s):", cluster, endpoints.len());
        for endpoint in endpoints {
            info!("  {}", endpoint.to_uri());
        }
        Ok(())
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
