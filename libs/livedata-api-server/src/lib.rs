//! Network front of a [`MemoryBroker`]: the framed request/response
//! protocol spoken by `TcpBroker`/`TcpProducer`, and a read-only HTTP view
//! of the topics.

mod http;
mod protocol;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use livedata_engine::MemoryBroker;

pub use protocol::{dispatch, serve_broker};

#[derive(Clone)]
pub(crate) struct AppState {
    broker: MemoryBroker,
}

/// Broker protocol on `0.0.0.0:{port}` until `shutdown` fires.
pub async fn run_broker(
    port: u16,
    broker: MemoryBroker,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind broker :{port}: {e}"))?;
    serve_broker(listener, broker, shutdown).await
}

/// HTTP API on `0.0.0.0:{port}` until `shutdown` fires.
pub async fn run_api(
    port: u16,
    broker: MemoryBroker,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    serve_api(listener, broker, shutdown).await
}

/// `GET /api/topics` and `GET /api/topics/{name}` on an already bound
/// listener.
pub async fn serve_api(
    listener: TcpListener,
    broker: MemoryBroker,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let state = AppState { broker };

    let app = Router::new()
        .route("/api/topics", get(http::handle_list_topics))
        .route("/api/topics/{name}", get(http::handle_topic))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
