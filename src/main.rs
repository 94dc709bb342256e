//! Ponte MQTT-to-HTTP delivery bridge.
//!
//! Main entry point. Initializes tracing, loads configuration, wires the
//! subscriber to the delivery pipeline, and coordinates graceful startup
//! and shutdown.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ponte_core::{PipelineMetrics, RealClock};
use ponte_delivery::{DeliveryEngine, LogOutcomeSink};
use ponte_ingest::{InboundAdapter, MqttSubscriber};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting ponte delivery bridge");

    let config = Config::load().context("configuration error")?;
    info!(
        broker = %config.mqtt_broker,
        port = config.mqtt_port,
        topic = %config.mqtt_topic,
        sink_url = %config.sink_url,
        queue_capacity = config.queue_capacity,
        worker_count = config.worker_count,
        "configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let clock = Arc::new(RealClock::new());

    let mut engine = DeliveryEngine::new(
        config.to_delivery_config(),
        Arc::new(LogOutcomeSink::new()),
        metrics.clone(),
    )
    .context("failed to build delivery engine")?;
    engine.start();

    let adapter = InboundAdapter::new(engine.handle(), metrics.clone(), clock);
    let subscriber_cancel = CancellationToken::new();
    let subscriber =
        MqttSubscriber::new(config.to_mqtt_config(), adapter, subscriber_cancel.clone());

    let subscriber_handle = tokio::spawn(async move {
        if let Err(e) = subscriber.run().await {
            error!(error = %e, "mqtt subscriber failed");
        }
    });

    info!("ponte is bridging messages");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    // Stop enqueueing first, then drain the pipeline.
    subscriber_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), subscriber_handle).await.is_err() {
        warn!("mqtt subscriber did not stop in time");
    }

    engine.shutdown().await.context("delivery engine shutdown failed")?;

    let snapshot = metrics.snapshot();
    info!(
        arrivals = snapshot.arrivals,
        delivered = snapshot.delivered,
        abandoned = snapshot.abandoned,
        dropped = snapshot.dropped,
        retries_scheduled = snapshot.retries_scheduled,
        "ponte shutdown complete"
    );

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,ponte=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
