//! Prometheus metrics endpoint

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::metrics::{KEY_CACHE_ENTRIES, REGISTRY};

/// GET /metrics
///
/// Refreshes scrape-time gauges, then returns all metrics in Prometheus
/// text format.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let stats = state.key_fetcher.stats().await;
    KEY_CACHE_ENTRIES.set(i64::try_from(stats.entries).unwrap_or(i64::MAX));

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, encoder.format_type().to_string())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Create metrics router
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
