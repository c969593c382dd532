//! HTTP server for the console.
//!
//! Provides:
//! - Chat turns streamed as server-sent events
//! - Task list and settings endpoints
//! - The static front-end

pub mod events;
pub mod routes;
pub mod state;

pub use events::{ChatEvent, EventSender};
pub use routes::create_router;
pub use state::{AppState, Session, SessionSink, SharedTasks};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::errors::JarvisResult;

/// Start the HTTP server on the configured port.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(state: Arc<AppState>) -> JarvisResult<()> {
    run_server_with_shutdown(state, std::future::pending()).await
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server stops accepting new connections when `shutdown_signal`
/// completes; streaming turns still persist their final state.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server_with_shutdown<F>(state: Arc<AppState>, shutdown_signal: F) -> JarvisResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let port = state.config.server.port;
    let app: Router = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("J.A.R.V.I.S. console listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Resolve when the process receives Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
