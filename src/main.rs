use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use realtime_flow_core::config::Settings;
use realtime_flow_core::connection_manager::{subscriber, ChannelEvent, ChannelManager};
use realtime_flow_core::metrics::encode_metrics;
use realtime_flow_core::telemetry::init_telemetry;
use realtime_flow_core::websocket::WebSocketTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.logging)?;
    tracing::info!(targets = settings.targets.len(), "Configuration loaded");

    let manager = ChannelManager::new(settings.channels.clone(), Arc::new(WebSocketTransport::new()));

    // Log channel lifecycle events in background
    let mut events = manager.events();
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Abandoned { name }) => {
                    tracing::error!(channel = %name, "Channel abandoned");
                }
                Ok(event) => tracing::info!(channel = %event.name(), event = ?event, "Channel event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Channel event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    for target in &settings.targets {
        match manager.connect(&target.name, &target.url).await {
            Ok(_) => {
                for message_type in &target.message_types {
                    let channel = target.name.clone();
                    let kind = message_type.clone();
                    manager.subscribe(
                        &target.name,
                        message_type,
                        subscriber(move |payload: &Value| {
                            tracing::info!(channel = %channel, message_type = %kind, payload = %payload, "Frame received");
                            Ok(())
                        }),
                    );
                }
            }
            Err(e) => tracing::error!(channel = %target.name, error = %e, "Failed to open channel"),
        }
    }

    tracing::info!(open = manager.live_count(), "Channels started");

    shutdown_signal().await;

    let closed = manager.disconnect_all();
    let stats = manager.stats();
    tracing::info!(
        closed = closed,
        remaining = stats.total_channels,
        max_connections = stats.max_connections,
        "Channels closed"
    );
    match encode_metrics() {
        Ok(metrics) => tracing::debug!(metrics = %metrics, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    events_handle.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating shutdown");
        }
    }
}
