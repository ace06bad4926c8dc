//! Campaign Express: segment-targeted campaign delivery service.
//!
//! Wires the in-memory stores, channel providers, and campaign service,
//! then serves the management API while the delivery ticker runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campaign_channels::{EmailProvider, SmsProvider, TemplateContentGenerator};
use campaign_core::channels::ChannelRegistry;
use campaign_core::config::AppConfig;
use campaign_dispatch::{CampaignService, DeliveryTicker};
use campaign_intelligent_delivery::EngagementSendTimePredictor;
use campaign_management::{demo_customers, management_router, InMemoryStores, ManagementState};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-express")]
#[command(about = "Segment-targeted campaign delivery service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Delivery tick interval in milliseconds (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__DISPATCH__TICK_INTERVAL_MS")]
    tick_interval_ms: Option<u64>,

    /// Only dispatch on explicit execute calls
    #[arg(long, default_value_t = false)]
    no_ticker: bool,

    /// Seed the customer store with demo customers
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_express=info,campaign_dispatch=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Express starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(ms) = cli.tick_interval_ms {
        config.dispatch.tick_interval_ms = ms;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        tick_interval_ms = config.dispatch.tick_interval_ms,
        "Configuration loaded"
    );

    if let Err(e) = start_metrics(&config) {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let stores = if cli.seed_demo {
        let customers = demo_customers();
        info!(customers = customers.len(), "Seeding demo customers");
        InMemoryStores::with_customers(customers)
    } else {
        InMemoryStores::new()
    };

    let email = Arc::new(EmailProvider::new(config.channels.email.clone()));
    let sms = Arc::new(SmsProvider::new(config.channels.sms.clone()));
    let channels = ChannelRegistry::new()
        .with_provider(email.clone())
        .with_provider(sms.clone());

    let service = Arc::new(
        CampaignService::builder(
            stores.stores(),
            Arc::new(TemplateContentGenerator::new("Campaign Express")),
        )
        .config(config.clone())
        .channels(channels)
        .predictor(Arc::new(EngagementSendTimePredictor::new()))
        .build()
        .context("invalid service configuration")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = if cli.no_ticker {
        info!("Delivery ticker disabled");
        None
    } else {
        let ticker = DeliveryTicker::new(
            Arc::clone(service.orchestrator()),
            Duration::from_millis(config.dispatch.tick_interval_ms),
        );
        Some(tokio::spawn(async move { ticker.run(shutdown_rx).await }))
    };

    let app = management_router(ManagementState {
        service,
        email: Some(email),
        sms: Some(sms),
    });

    let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.http_port)
        .parse()
        .context("invalid API listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Campaign Express is ready to serve traffic");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = ticker {
        if let Err(e) = handle.await {
            error!(error = %e, "Delivery ticker task failed");
        }
    }

    info!("Campaign Express stopped");
    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.api.host.parse()?, config.metrics.port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
