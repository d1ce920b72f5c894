//! HTTP surface of the trigger gateway.
//!
//! One route, `POST /trigger-reputation-update`. The request body is ignored.
//! Responses are plain text:
//!
//! | Gateway state | Status | Body |
//! |---------------|--------|------|
//! | Idle | `202 Accepted` | `Accepted: Reputation update process started.` |
//! | Running | `429 Too Many Requests` | `Processing already in progress.` |

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{extract::State, http::StatusCode, routing::post, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::gateway::{TriggerGateway, TriggerResult};

pub const TRIGGER_PATH: &str = "/trigger-reputation-update";
pub const ACCEPTED_BODY: &str = "Accepted: Reputation update process started.";
pub const REJECTED_BODY: &str = "Processing already in progress.";

/// Builds the gateway router.
pub fn create_router(gateway: Arc<TriggerGateway>) -> Router {
    Router::new()
        .route(TRIGGER_PATH, post(trigger_update))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn trigger_update(State(gateway): State<Arc<TriggerGateway>>) -> (StatusCode, &'static str) {
    info!("Received trigger request");
    match gateway.trigger() {
        TriggerResult::Accepted { run_id } => {
            info!(run_id = %run_id, "Trigger accepted");
            (StatusCode::ACCEPTED, ACCEPTED_BODY)
        }
        TriggerResult::Rejected(reason) => {
            info!(?reason, "Trigger rejected");
            (StatusCode::TOO_MANY_REQUESTS, REJECTED_BODY)
        }
    }
}

/// Serves the gateway on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    gateway: Arc<TriggerGateway>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(gateway);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, path = TRIGGER_PATH, "Trigger gateway listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("Trigger gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    warn!("New triggers are no longer accepted");
}
