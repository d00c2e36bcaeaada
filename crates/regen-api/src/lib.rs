//! HTTP surface for the Regen artifact cache.
//!
//! Lets a content backend announce data changes: a `POST /api/revalidate`
//! with a tag or a path invalidates the matching entries and purges them at
//! the edge.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the router on `addr` until the process is stopped.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Revalidation API listening");
    axum::serve(listener, create_router(state)).await
}
