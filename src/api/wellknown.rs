//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::generate_webfinger_response;
use crate::federation::webfinger::parse_account;

const JRD_CONTENT_TYPE: &str = "application/jrd+json";

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for local actors with a provisioned key.
///
/// Query: ?resource=acct:user@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !query.resource.starts_with("acct:") {
        return Err(AppError::Validation(
            "Resource must start with 'acct:'".to_string(),
        ));
    }

    let (username, domain) = parse_account(&query.resource)
        .map_err(|_| AppError::Validation("Invalid acct format".to_string()))?;

    if !domain.eq_ignore_ascii_case(&state.config.server.domain) || !state.is_local_actor(&username)
    {
        return Err(AppError::NotFound);
    }
    // Only advertise actors that can sign.
    state.keys.identity(&username).await?;

    let base_url = state.config.server.base_url();
    let response = generate_webfinger_response(&username, &state.config.server.domain, &base_url);

    Ok(([(CONTENT_TYPE, JRD_CONTENT_TYPE)], Json(response)))
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery.
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = state.config.server.base_url();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([(CONTENT_TYPE, "application/xrd+xml")], xml)
}
