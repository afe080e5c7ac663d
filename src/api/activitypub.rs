//! ActivityPub endpoints
//!
//! - Actor document
//! - Inbox (activity receiving)

use axum::{
    Router,
    extract::{Path, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;

use crate::AppState;
use crate::delivery::ACTIVITY_CONTENT_TYPE;
use crate::error::AppError;
use crate::metrics::FEDERATION_REQUEST_DURATION_SECONDS;

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:username - Actor document
/// - POST /users/:username/inbox - Personal inbox
/// - POST /inbox - Shared inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/users/:username/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
}

/// GET /users/:username
///
/// Returns the ActivityPub actor document with the actor's active public key.
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_local_actor(&username) {
        return Err(AppError::NotFound);
    }

    let identity = state.keys.identity(&username).await?;
    let public_key_pem = state.keys.public_key_pem(&username).await?;
    let base_url = state.config.server.base_url();
    let actor_url = identity.actor_uri;

    let document = json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": actor_url,
        "preferredUsername": username,
        "inbox": format!("{}/inbox", actor_url),
        "endpoints": {
            "sharedInbox": format!("{}/inbox", base_url)
        },
        "url": actor_url,
        "publicKey": {
            "id": identity.key_id,
            "owner": actor_url,
            "publicKeyPem": public_key_pem
        }
    });

    Ok(([(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)], Json(document)))
}

/// Buffer the body and hand the request to the inbox processor
async fn receive(
    state: &AppState,
    request: Request,
    recipient: Option<&str>,
) -> Result<StatusCode, AppError> {
    let _timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read request body: {}", e)))?;

    state
        .inbox
        .process(http::Request::from_parts(parts, body.to_vec()), recipient)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// POST /users/:username/inbox
///
/// Receives signed activities addressed to one local actor.
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    if !state.is_local_actor(&username) {
        return Err(AppError::NotFound);
    }

    receive(&state, request, Some(&username)).await
}

/// POST /inbox
///
/// Shared inbox for all actors on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    request: Request,
) -> Result<StatusCode, AppError> {
    receive(&state, request, None).await
}
