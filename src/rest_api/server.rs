//! Axum HTTP server for the REST API

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::Context;
use crate::{Error, Result};

use super::handlers;

/// Routes served by the REST API
pub fn router(ctx: Arc<Context>) -> Router {
    let app = Router::new().route("/health", get(handlers::health));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(handlers::metrics));

    app.route(
        "/api/v1/pullsubscriptions",
        get(handlers::list_subscriptions),
    )
    .route(
        "/api/v1/pullsubscriptions/{namespace}/{name}",
        get(handlers::get_subscription),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(ctx)
}

/// Run the REST API server until `shutdown` resolves
pub async fn run_server(
    ctx: Arc<Context>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("REST API server listening on {}", addr);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
