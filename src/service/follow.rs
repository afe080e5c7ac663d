//! Follow acceptance
//!
//! Answers every `Follow` addressed to a local actor with an `Accept`
//! queued for delivery to the follower's inbox.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::delivery::DeliveryQueue;
use crate::error::AppError;
use crate::federation::{
    ActivityHandler, ActivityType, InboundActivity, InboxContext, KeyPairManager,
};

const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

fn extract_follow_target(activity: &Value) -> Result<String, AppError> {
    let object = activity
        .get("object")
        .ok_or_else(|| AppError::Validation("Missing object in Follow".to_string()))?;

    object
        .as_str()
        .or_else(|| object.get("id").and_then(Value::as_str))
        .map(|target| target.trim_end_matches('/').to_string())
        .ok_or_else(|| AppError::Validation("Invalid object in Follow".to_string()))
}

/// Build the `Accept` wrapping `follow`
pub fn build_accept(accept_id: &str, actor_uri: &str, follow: &InboundActivity, target: &str) -> Value {
    let mut object = serde_json::Map::new();
    object.insert("type".to_string(), json!("Follow"));
    if let Some(id) = &follow.id {
        object.insert("id".to_string(), json!(id));
    }
    object.insert("actor".to_string(), json!(follow.actor));
    object.insert("object".to_string(), json!(target));

    json!({
        "@context": ACTIVITY_STREAMS_CONTEXT,
        "id": accept_id,
        "type": "Accept",
        "actor": actor_uri,
        "object": Value::Object(object),
    })
}

/// Default [`ActivityHandler`]: auto-accepts follows, logs everything else
pub struct FollowAcceptor {
    keys: Arc<KeyPairManager>,
    queue: Arc<DeliveryQueue>,
}

impl FollowAcceptor {
    pub fn new(keys: Arc<KeyPairManager>, queue: Arc<DeliveryQueue>) -> Self {
        Self { keys, queue }
    }

    /// Local actor id addressed by `target`, if it is one of ours
    fn local_actor_id<'a>(&self, target: &'a str) -> Option<&'a str> {
        let (_, actor_id) = target.rsplit_once('/')?;
        (!actor_id.is_empty() && self.keys.actor_uri(actor_id) == target).then_some(actor_id)
    }

    async fn accept_follow(
        &self,
        follow: InboundActivity,
        context: InboxContext,
    ) -> Result<(), AppError> {
        let target = extract_follow_target(&follow.body)?;
        let actor_id = self.local_actor_id(&target).ok_or_else(|| {
            AppError::Validation("Follow target is not a local actor".to_string())
        })?;

        if let Some(recipient) = context.recipient.as_deref() {
            if recipient != actor_id {
                return Err(AppError::Validation(format!(
                    "Follow for {} delivered to inbox of {}",
                    actor_id, recipient
                )));
            }
        }

        let identity = self.keys.identity(actor_id).await.map_err(|e| {
            tracing::debug!(actor_id, error = %e, "Follow for actor without key pair");
            AppError::NotFound
        })?;

        let follower_key = &context.verified.key;
        let inbox = follower_key
            .inbox
            .clone()
            .or_else(|| follower_key.shared_inbox.clone())
            .ok_or_else(|| {
                AppError::Validation(format!("Follower {} advertises no inbox", follow.actor))
            })?;

        let accept_id = format!(
            "{}#accepts/follows/{}",
            identity.actor_uri,
            ulid::Ulid::new()
        );
        let accept = build_accept(&accept_id, &identity.actor_uri, &follow, &target);
        let task_id = self.queue.enqueue(actor_id, &inbox, &accept).await?;

        tracing::info!(
            actor_id,
            follower = %follow.actor,
            %inbox,
            %task_id,
            "Accepted follow"
        );
        Ok(())
    }
}

#[async_trait]
impl ActivityHandler for FollowAcceptor {
    async fn handle(&self, activity: InboundActivity, context: InboxContext) -> Result<(), AppError> {
        match activity.activity_type {
            ActivityType::Follow => self.accept_follow(activity, context).await,
            other => {
                tracing::debug!(
                    activity_type = other.as_str(),
                    actor = %activity.actor,
                    "Ignoring activity"
                );
                Ok(())
            }
        }
    }
}
