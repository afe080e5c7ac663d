//! Inbox processing
//!
//! Verifies a signed inbound request and only then parses the activity
//! and hands it to the [`ActivityHandler`]. A request that fails
//! verification never reaches the handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::clock::Clock;
use super::verifier::{SignatureVerifier, VerifiedSignature};
use crate::error::AppError;
use crate::metrics::ACTIVITYPUB_ACTIVITIES_RECEIVED;

/// ActivityPub Activity types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
    Block,
}

impl ActivityType {
    /// Parse activity type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Update" => Some(Self::Update),
            "Delete" => Some(Self::Delete),
            "Follow" => Some(Self::Follow),
            "Accept" => Some(Self::Accept),
            "Reject" => Some(Self::Reject),
            "Undo" => Some(Self::Undo),
            "Like" => Some(Self::Like),
            "Announce" => Some(Self::Announce),
            "Block" => Some(Self::Block),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Block => "Block",
        }
    }
}

/// A verified activity ready for domain logic
#[derive(Debug, Clone)]
pub struct InboundActivity {
    pub activity_type: ActivityType,
    pub id: Option<String>,
    /// Actor URI named by the activity (equal to the signing key's owner)
    pub actor: String,
    /// Full activity document
    pub body: Value,
}

/// Who delivered the activity and where
#[derive(Debug, Clone)]
pub struct InboxContext {
    pub verified: VerifiedSignature,
    /// Local actor whose personal inbox was addressed; `None` for the shared inbox
    pub recipient: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Domain logic consuming inbound activities
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, activity: InboundActivity, context: InboxContext) -> Result<(), AppError>;
}

fn activity_actor(activity: &Value) -> Option<&str> {
    let actor = activity.get("actor")?;
    actor
        .as_str()
        .or_else(|| actor.get("id").and_then(Value::as_str))
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Inbox entry point
pub struct InboxProcessor {
    verifier: Arc<SignatureVerifier>,
    handler: Arc<dyn ActivityHandler>,
    clock: Arc<dyn Clock>,
}

impl InboxProcessor {
    pub fn new(
        verifier: Arc<SignatureVerifier>,
        handler: Arc<dyn ActivityHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            handler,
            clock,
        }
    }

    /// Verify and dispatch one inbound request
    ///
    /// # Errors
    /// - signature errors from the verifier (rejected before parsing)
    /// - `Validation` if the body is not an activity of a known type
    /// - `Forbidden` if the activity's actor does not own the signing key
    pub async fn process(
        &self,
        request: http::Request<Vec<u8>>,
        recipient: Option<&str>,
    ) -> Result<(), AppError> {
        let verified = self.verifier.verify(&request).await?;

        let body: Value = serde_json::from_slice(request.body())
            .map_err(|e| AppError::Validation(format!("Invalid activity JSON: {}", e)))?;

        let type_name = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Missing activity type".to_string()))?;
        let activity_type = ActivityType::parse(type_name).ok_or_else(|| {
            AppError::Validation(format!("Unknown activity type: {}", type_name))
        })?;

        let actor = activity_actor(&body)
            .ok_or_else(|| AppError::Validation("Missing activity actor".to_string()))?
            .to_string();

        if verified.actor_uri != actor && !key_id_matches_actor(&verified.key_id, &actor) {
            tracing::warn!(
                key_id = %verified.key_id,
                key_owner = %verified.actor_uri,
                %actor,
                "Activity actor does not own signing key"
            );
            return Err(AppError::Forbidden);
        }

        ACTIVITYPUB_ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type.as_str()])
            .inc();
        tracing::info!(
            activity_type = activity_type.as_str(),
            %actor,
            recipient = recipient.unwrap_or("shared"),
            "Accepted inbound activity"
        );

        let activity = InboundActivity {
            activity_type,
            id: body.get("id").and_then(Value::as_str).map(str::to_string),
            actor,
            body,
        };
        let context = InboxContext {
            verified,
            recipient: recipient.map(str::to_string),
            received_at: self.clock.now(),
        };

        self.handler.handle(activity, context).await
    }
}
