//! pagesync-relay: standalone WebSocket relay for live content edits.
//!
//! Accepts editing sessions, assigns each an ephemeral identifier, and fans
//! every inbound message out to all other connected sessions. Holds no
//! durable state; the content store is the durability layer.

use clap::Parser;
use pagesync::config::RelayArgs;
use pagesync::ws::{create_router, Relay};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RelayArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let relay = Arc::new(Relay::new());
    let app = create_router(relay.clone(), &args.ws_path);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, ws_path = %args.ws_path, "relay listening");

    let shutdown_relay = relay.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down; closing sessions");
            shutdown_relay.close_all().await;
        })
        .await?;

    tracing::info!("relay stopped");
    Ok(())
}
