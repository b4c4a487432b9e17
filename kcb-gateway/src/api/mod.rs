//! HTTP API server.
//!
//! Maps HTTP methods and paths onto gateway operations. Request bodies are
//! handed to the gateway as raw text; unknown paths get 404 and wrong
//! methods 405 from the router itself.

mod v1;

pub use v1::{routes, AppState, ErrorResponse};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::tracing::prelude::*;

/// Serve the API on `listener` until `running` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, running: CancellationToken) -> Result<()> {
    let app = routes(state).layer(TraceLayer::new_for_http());

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { running.cancelled().await })
        .await?;

    debug!("API stopped");
    Ok(())
}
