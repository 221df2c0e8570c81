use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::task::JoinHandle;

use crate::common::AppState;

pub fn launch(state: Arc<AppState>, addr: SocketAddr) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(run_server(state, addr))
}

async fn run_server(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting service at {:?}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler(state: axum::extract::State<Arc<AppState>>) -> impl IntoResponse {
    match state.report_metrics() {
        Ok((buffer, format)) => Response::builder()
            .header("Content-Type", format)
            .body(buffer.into())
            .map(|response| (StatusCode::OK, response))
            .unwrap_or_else(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create response for metrics".into_response(),
                )
            }),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to collect metrics".into_response(),
        ),
    }
}
