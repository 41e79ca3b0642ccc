//! Application startup and server initialization.
//!
//! Builds the authentication gate, wraps a minimal host application with it
//! and serves until Ctrl-C.

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ConfigV1;
use crate::gate::AtprotoAuth;
use crate::routes::health_routes;

/// The host application the bundled binary serves behind the gate.
pub fn host_router() -> Router {
    Router::new()
        .route("/", get(index))
        .merge(health_routes())
}

async fn index() -> impl IntoResponse {
    "atgate is running"
}

/// Initializes and runs the application server.
///
/// # Errors
///
/// Returns an error if the gate configuration is invalid, the listener
/// cannot bind, or the server fails while running.
pub async fn run(config: Arc<ConfigV1>) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AtprotoAuth::new(config.gate.clone())?;
    let app = Router::new().fallback_service(auth.wrap(host_router()));

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Starting server on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    auth.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
