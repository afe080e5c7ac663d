//! Durable delivery queue
//!
//! Domain logic enqueues activities here; delivery failures are recorded on
//! the task and never returned to the enqueuer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::task::{DeliveryState, DeliveryTask};
use crate::error::AppError;
use crate::federation::clock::Clock;
use crate::metrics::DELIVERIES_DEAD_LETTERED;

/// Persistence for delivery tasks
///
/// `claim_due` must hand each task to at most one caller.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_task(&self, task: &DeliveryTask) -> Result<(), AppError>;

    /// Atomically move the oldest due `Pending`/`Retrying` task to `InFlight`
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryTask>, AppError>;

    async fn update_task(&self, task: &DeliveryTask) -> Result<(), AppError>;

    async fn get_task(&self, id: &str) -> Result<Option<DeliveryTask>, AppError>;

    /// Tasks in `state`, oldest first
    async fn list_tasks(
        &self,
        state: DeliveryState,
        limit: usize,
    ) -> Result<Vec<DeliveryTask>, AppError>;

    async fn count_tasks(&self, state: DeliveryState) -> Result<u64, AppError>;

    /// Delete tasks in `state` last updated before `cutoff`
    async fn delete_tasks_before(
        &self,
        state: DeliveryState,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Move every `InFlight` task back to `Retrying`, due at `now`
    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Deduplicate identical inbox URIs while keeping distinct personal inboxes.
///
/// This preserves recipients on the same domain that use different inbox paths.
fn unique_inbox_targets(inbox_uris: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox_uri in inbox_uris {
        if seen.insert(inbox_uri.clone()) {
            targets.push(inbox_uri);
        }
    }

    targets
}

fn validate_inbox_url(inbox_url: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(inbox_url)
        .map_err(|e| AppError::Validation(format!("Invalid inbox URL {}: {}", inbox_url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(AppError::Validation(format!(
            "Unsupported inbox URL: {}",
            inbox_url
        ))),
    }
}

/// Front door of outbound delivery
pub struct DeliveryQueue {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
}

impl DeliveryQueue {
    pub fn new(store: Arc<dyn DeliveryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Queue `activity` for delivery to `inbox_url`, signed as `actor_id`
    ///
    /// # Returns
    /// The new task id
    ///
    /// # Errors
    /// `Validation` if the inbox URL is not http(s)
    pub async fn enqueue(
        &self,
        actor_id: &str,
        inbox_url: &str,
        activity: &serde_json::Value,
    ) -> Result<String, AppError> {
        validate_inbox_url(inbox_url)?;
        let payload = serde_json::to_string(activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?;

        let task = DeliveryTask::new(actor_id, inbox_url, payload, self.clock.now());
        self.store.insert_task(&task).await?;

        tracing::debug!(task_id = %task.id, inbox = %inbox_url, actor_id, "Queued delivery");
        Ok(task.id)
    }

    /// Queue one task per distinct inbox
    ///
    /// # Note
    /// Deduplicates identical inbox URIs while preserving distinct inbox paths.
    pub async fn enqueue_many(
        &self,
        actor_id: &str,
        inbox_urls: Vec<String>,
        activity: &serde_json::Value,
    ) -> Result<Vec<String>, AppError> {
        let total = inbox_urls.len();
        let targets = unique_inbox_targets(inbox_urls);

        let mut ids = Vec::with_capacity(targets.len());
        for inbox_url in &targets {
            ids.push(self.enqueue(actor_id, inbox_url, activity).await?);
        }

        tracing::info!(
            actor_id,
            unique = targets.len(),
            total,
            "Queued activity for delivery"
        );
        Ok(ids)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeliveryTask>, AppError> {
        self.store.get_task(id).await
    }

    pub async fn tasks_in_state(
        &self,
        state: DeliveryState,
        limit: usize,
    ) -> Result<Vec<DeliveryTask>, AppError> {
        self.store.list_tasks(state, limit).await
    }

    /// Dead-lettered tasks kept for inspection
    pub async fn dead_lettered(&self, limit: usize) -> Result<Vec<DeliveryTask>, AppError> {
        self.store.list_tasks(DeliveryState::DeadLettered, limit).await
    }

    pub(crate) async fn claim_due(&self) -> Result<Option<DeliveryTask>, AppError> {
        self.store.claim_due(self.clock.now()).await
    }

    pub(crate) async fn save(&self, task: &DeliveryTask) -> Result<(), AppError> {
        self.store.update_task(task).await
    }

    /// Delete dead-lettered tasks older than `retention`
    pub async fn cleanup_dead_lettered_tasks(
        &self,
        retention: chrono::Duration,
    ) -> Result<u64, AppError> {
        let cutoff = self.clock.now() - retention;
        let deleted = self
            .store
            .delete_tasks_before(DeliveryState::DeadLettered, cutoff)
            .await?;
        self.refresh_dead_letter_gauge().await?;
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "Removed expired dead-lettered deliveries");
        }
        Ok(deleted)
    }

    /// Delete delivered tasks older than `retention`
    pub async fn cleanup_delivered_tasks(
        &self,
        retention: chrono::Duration,
    ) -> Result<u64, AppError> {
        let cutoff = self.clock.now() - retention;
        let deleted = self
            .store
            .delete_tasks_before(DeliveryState::Delivered, cutoff)
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, %cutoff, "Removed delivered tasks past retention");
        }
        Ok(deleted)
    }

    /// Requeue tasks left `InFlight` by a crash; run before workers start
    pub async fn recover_interrupted(&self) -> Result<u64, AppError> {
        let recovered = self.store.requeue_in_flight(self.clock.now()).await?;
        self.refresh_dead_letter_gauge().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Requeued deliveries interrupted by a previous shutdown");
        }
        Ok(recovered)
    }

    async fn refresh_dead_letter_gauge(&self) -> Result<(), AppError> {
        let count = self.store.count_tasks(DeliveryState::DeadLettered).await?;
        DELIVERIES_DEAD_LETTERED.set(i64::try_from(count).unwrap_or(i64::MAX));
        Ok(())
    }
}
