//! Fleetlink relay binary.
//!
//! Composition root: loads settings, builds the shared state (store,
//! registry, fan-out), spawns the two stream consumers plus the prune and
//! retention tasks, and serves the HTTP/WebSocket surface until a
//! shutdown signal arrives.

use std::sync::Arc;

use anyhow::Context;
use fleetlink_core::retry::RetryPolicy;
use fleetlink_server::apply::{BroadcastApply, ForwardApply};
use fleetlink_server::fanout::SubscriberFanout;
use fleetlink_server::registry::DeviceRegistry;
use fleetlink_server::state::AppState;
use fleetlink_server::{http, metrics};
use fleetlink_settings::FleetSettings;
use fleetlink_store::{
    retention, AckMode, ConsumerConfig, MemoryStreamStore, RedisStreamStore, StreamConsumer,
    StreamCursor, StreamStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(FleetSettings::from_env());
    info!(
        addr = %settings.bind_addr(),
        store = %settings.store.url,
        "fleetlink starting"
    );

    let metrics_handle = metrics::install_recorder();

    let store: Arc<dyn StreamStore> = if settings.uses_memory_store() {
        info!("using in-process stream store");
        Arc::new(MemoryStreamStore::new())
    } else {
        Arc::new(RedisStreamStore::new(
            settings.store.url.clone(),
            RetryPolicy::default(),
        ))
    };

    // Warm the shared connection once; consumers keep retrying on their own.
    if let Err(err) = store.reset().await {
        warn!(error = %err, "store not reachable at startup, will keep retrying");
    }

    let registry = Arc::new(DeviceRegistry::new(settings.registry.stale_timeout));
    let fanout = Arc::new(SubscriberFanout::new());
    let state = AppState::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&fanout),
        metrics_handle,
    );

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    let command_consumer = StreamConsumer::new(
        Arc::clone(&store),
        ConsumerConfig::new(
            settings.store.command_stream.clone(),
            StreamCursor::new(settings.store.command_stream_start.clone()),
            AckMode::Acknowledge,
        ),
        ForwardApply::new(Arc::clone(&registry)),
    );
    tasks.push(tokio::spawn(command_consumer.run(shutdown.child_token())));

    let mut status_config = ConsumerConfig::new(
        settings.store.status_stream.clone(),
        StreamCursor::new(settings.store.status_stream_start.clone()),
        AckMode::ReadOnly,
    );
    status_config.batch = 50;
    let status_consumer = StreamConsumer::new(
        Arc::clone(&store),
        status_config,
        BroadcastApply::new(Arc::clone(&fanout)),
    );
    tasks.push(tokio::spawn(status_consumer.run(shutdown.child_token())));

    tasks.push(tokio::spawn(Arc::clone(&registry).run_auto_prune(
        settings.registry.prune_interval,
        shutdown.child_token(),
    )));

    tasks.push(tokio::spawn(retention::run_retention(
        Arc::clone(&store),
        vec![
            settings.store.command_stream.clone(),
            settings.store.status_stream.clone(),
        ],
        settings.store.retention,
        settings.store.trim_interval,
        shutdown.child_token(),
    )));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr()))?;
    info!(addr = %settings.bind_addr(), "listening");

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            signal_shutdown.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task ended abnormally");
        }
    }
    registry.close_all();
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        let _ = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
