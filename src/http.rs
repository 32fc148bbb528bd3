use crate::metrics::Metrics;
use crate::state::{Snapshot, State as AgentState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<AgentState>>,
}

pub fn build_router(metrics: Arc<Metrics>, state: Arc<RwLock<AgentState>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .with_state(HttpAppState { metrics, state })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

/// Same document that is POSTed to the collector. Before the first tick
/// this is the default snapshot.
async fn snapshot_handler(State(state): State<HttpAppState>) -> Json<Snapshot> {
    let guard = state.state.read().await;
    Json(guard.snapshot.clone())
}
