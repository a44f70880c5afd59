// src/http/mod.rs

//! REST + SSE transport over [`JobService`].

pub mod error;
pub mod routes;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::JobService;
use crate::errors::Result;

pub use error::{ApiError, ErrorResponse};

/// Full application router with state attached.
pub fn router(service: Arc<JobService>) -> Router {
    routes::router().with_state(service)
}

/// Serve the API on `bind` until `shutdown` fires.
pub async fn serve(
    service: Arc<JobService>,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
