//! Health probe endpoint polled by the registry.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

use crate::registration::CHECK_PATH;

/// Body returned by a healthy node.
pub const CHECK_BODY: &str = "consulCheck";

pub fn router() -> Router {
    Router::new().route(CHECK_PATH, get(check))
}

async fn check() -> &'static str {
    CHECK_BODY
}

/// Serves the probe until the listener fails.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router()).await
}
