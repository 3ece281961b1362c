// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use axum::{routing::{delete, get, post}, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::clock::{Clock, SystemClock};
use crate::application::current_values::{CurrentValueMirror, CurrentValues};
use crate::application::persistence::PersistenceGateway;
use crate::application::session::ChartSession;
use crate::application::session_runner;
use crate::application::shutdown::{self, ShutdownTrigger};
use crate::application::snapshot_store::KeyValueStore;
use crate::application::subscriber::StreamSubscriber;
use crate::application::transport::Transport;
use crate::infrastructure::config::{BrokerSettings, TransportKind, load_settings};
use crate::infrastructure::detector_simulator;
use crate::infrastructure::file_store::{FileStore, MemoryStore};
use crate::infrastructure::local_broker::LocalBroker;
use crate::infrastructure::mqtt_transport::MqttTransport;
use crate::infrastructure::watch_renderer::WatchRenderer;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    chart_status, clear_cache, current_values, get_chart, health_check, publish_signal,
    resize_chart, restart_chart, start_chart, stop_chart, stream_chart, toggle_channel,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let settings = load_settings()?;
    let topic = settings.broker.signal_topic.clone();

    // Storage and transport (infrastructure layer)
    let store: Arc<dyn KeyValueStore> = if settings.storage.dir.is_empty() {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(&settings.storage.dir))
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (transport, simulator_transport) = transports(&settings.broker)?;
    let (trigger, shutdown) = shutdown::channel();

    let simulator = settings.simulator.enabled.then(|| {
        tokio::spawn(detector_simulator::run(
            simulator_transport,
            topic.clone(),
            Duration::from_millis(settings.simulator.interval_ms),
        ))
    });

    // Chart session (application layer)
    let default_signal = settings.run.default_signal;
    let mirror = CurrentValueMirror::new(CurrentValues {
        primary: default_signal.primary,
        secondary: default_signal.secondary,
        signal: default_signal.primary,
    });
    let (renderer, scene) = WatchRenderer::new();
    let persistence = PersistenceGateway::new(
        store,
        clock.clone(),
        settings.storage.cache_key.clone(),
        settings.storage.max_age_ms(),
    );
    let subscriber = StreamSubscriber::new(transport, settings.broker.max_reconnect_attempts);
    let session = ChartSession::new(
        settings.run.clone(),
        topic,
        clock,
        persistence,
        subscriber,
        Box::new(renderer),
        mirror.clone(),
    )?;

    let (handle, commands) = session_runner::channel();
    let runner = tokio::spawn(session_runner::run(
        session,
        commands,
        shutdown.clone(),
        Duration::from_millis(settings.run.tick_interval_ms),
        Duration::from_millis(settings.run.resize_debounce_ms),
    ));
    handle.start().await?;

    // Create application state
    let state = Arc::new(AppState {
        session: handle,
        scene,
        current_values: mirror,
        shutdown,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/current", get(current_values))
        .route("/chart", get(get_chart))
        .route("/chart/stream", get(stream_chart))
        .route("/chart/status", get(chart_status))
        .route("/chart/start", post(start_chart))
        .route("/chart/stop", post(stop_chart))
        .route("/chart/restart", post(restart_chart))
        .route("/chart/channels/:id/toggle", post(toggle_channel))
        .route("/chart/resize", post(resize_chart))
        .route("/chart/cache", delete(clear_cache))
        .route("/signal", post(publish_signal))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = settings.server.bind.parse()?;
    tracing::info!(%addr, transport = ?settings.broker.kind, "Starting chromatograph-telemetry service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal(trigger))
        .await?;

    // The runner saw the same signal and tears the session down.
    if let Some(simulator) = simulator {
        simulator.abort();
    }
    runner.await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Session transport and simulator transport. Over MQTT they are separate
/// clients, since a broker drops one of two sessions sharing a client id.
fn transports(broker: &BrokerSettings) -> anyhow::Result<(Arc<dyn Transport>, Arc<dyn Transport>)> {
    match broker.kind {
        TransportKind::Local => {
            let local = LocalBroker::new();
            let session: Arc<dyn Transport> = Arc::new(local.transport());
            let simulator: Arc<dyn Transport> = Arc::new(local.transport());
            Ok((session, simulator))
        }
        TransportKind::Mqtt => {
            let simulator_id = format!("{}-simulator", broker.client_id);
            let session: Arc<dyn Transport> = Arc::new(MqttTransport::new(broker, &broker.client_id)?);
            let simulator: Arc<dyn Transport> = Arc::new(MqttTransport::new(broker, &simulator_id)?);
            Ok((session, simulator))
        }
    }
}

async fn shutdown_signal(trigger: ShutdownTrigger) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
    trigger.trigger();
}
