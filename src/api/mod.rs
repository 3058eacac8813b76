//! HTTP surface: landing page, metrics, health and readiness.
//!
//! Handlers only read shared state; none of them touch the network.

use crate::metrics::MetricsExporter;
use crate::pipeline::PipelineState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const LANDING_PAGE: &str = r#"<html>
<head><title>Grainfather Exporter</title></head>
<body>
<h1>Grainfather Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<PipelineState>,
    pub exporter: MetricsExporter,
}

impl ApiState {
    pub fn new(pipeline: Arc<PipelineState>) -> Self {
        let exporter = MetricsExporter::new(Arc::clone(pipeline.cache()));
        Self { pipeline, exporter }
    }
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Static landing page.
async fn index() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// Prometheus text format.
async fn metrics(State(state): State<ApiState>) -> Response {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.exporter.render(),
    )
        .into_response()
}

/// Process liveness.
async fn health() -> &'static str {
    "ok"
}

/// 200 once the pipeline resolved its credential and device, 503 before.
async fn ready(State(state): State<ApiState>) -> Response {
    if state.pipeline.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing").into_response()
    }
}
