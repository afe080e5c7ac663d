//! Delivery workers
//!
//! Each worker claims one due task at a time, signs the activity as the
//! task's actor, POSTs it and records the classified outcome. Shutdown
//! interrupts an attempt in progress; the task goes back to the queue
//! without losing retry budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use http::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backoff::RetryPolicy;
use super::queue::DeliveryQueue;
use super::task::{AttemptOutcome, DeliveryState, DeliveryTask};
use crate::config::DeliveryConfig;
use crate::error::{AppError, FederationError};
use crate::federation::clock::Clock;
use crate::federation::keys::KeyPairManager;
use crate::federation::signer::SignatureSigner;
use crate::federation::transport::{HttpTransport, TransportError};
use crate::metrics::{
    DELIVERIES_DEAD_LETTERED, DELIVERY_ATTEMPTS_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS,
};

/// Content type of delivered activities
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// Map an inbox response status to an attempt outcome
///
/// 2xx delivers; 429 and 5xx are worth retrying; anything else is final.
pub fn classify_status(status: StatusCode) -> AttemptOutcome {
    let code = status.as_u16();
    if status.is_success() {
        AttemptOutcome::Delivered { status: code }
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AttemptOutcome::transient(Some(code), format!("HTTP {}", status))
    } else {
        AttemptOutcome::permanent(Some(code), format!("HTTP {}", status))
    }
}

fn classify_transport_error(error: TransportError) -> AttemptOutcome {
    match error {
        TransportError::Blocked(_) | TransportError::InvalidRequest(_) => {
            AttemptOutcome::permanent(None, error.to_string())
        }
        _ => AttemptOutcome::transient(None, error.to_string()),
    }
}

fn classify_signing_error(error: AppError) -> AttemptOutcome {
    match error {
        AppError::Federation(FederationError::KeyNotProvisioned(actor)) => {
            AttemptOutcome::permanent(None, format!("No key pair for actor {}", actor))
        }
        other => AttemptOutcome::transient(None, other.to_string()),
    }
}

fn outcome_label(outcome: &AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Delivered { .. } => "delivered",
        AttemptOutcome::Permanent { .. } => "permanent",
        AttemptOutcome::Transient { .. } => "transient",
        AttemptOutcome::Interrupted => "interrupted",
    }
}

/// A dropped sender counts as shutdown.
fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Pool of delivery workers draining a [`DeliveryQueue`]
pub struct DeliveryWorkerPool {
    queue: Arc<DeliveryQueue>,
    keys: Arc<KeyPairManager>,
    signer: Arc<SignatureSigner>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    workers: usize,
    poll_interval: Duration,
}

impl DeliveryWorkerPool {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        keys: Arc<KeyPairManager>,
        signer: Arc<SignatureSigner>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            queue,
            keys,
            signer,
            transport,
            clock,
            policy: RetryPolicy::from_config(config),
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start the workers
    ///
    /// Workers stop when `shutdown` turns `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!(workers = self.workers, "Starting delivery workers");
        (0..self.workers)
            .map(|worker| {
                let pool = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            match self.queue.claim_due().await {
                Ok(Some(task)) => {
                    let outcome = tokio::select! {
                        outcome = self.attempt(&task) => outcome,
                        _ = shutdown.wait_for(|stop| *stop) => AttemptOutcome::Interrupted,
                    };
                    if let Err(e) = self.finish(task, outcome).await {
                        tracing::error!(worker, error = %e, "Failed to record delivery outcome");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
                Err(e) => {
                    tracing::error!(worker, error = %e, "Failed to claim delivery task");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
            }
        }

        tracing::debug!(worker, "Delivery worker stopped");
    }

    /// Claim and attempt a single due task
    ///
    /// # Returns
    /// The task as recorded after the attempt, or `None` if nothing was due
    pub async fn run_once(&self) -> Result<Option<DeliveryTask>, AppError> {
        let Some(task) = self.queue.claim_due().await? else {
            return Ok(None);
        };
        let outcome = self.attempt(&task).await;
        self.finish(task, outcome).await.map(Some)
    }

    async fn attempt(&self, task: &DeliveryTask) -> AttemptOutcome {
        let identity = match self.keys.identity(&task.actor_id).await {
            Ok(identity) => identity,
            Err(e) => return classify_signing_error(e),
        };

        let mut request = match http::Request::post(task.inbox_url.as_str())
            .header(CONTENT_TYPE, ACTIVITY_CONTENT_TYPE)
            .header(ACCEPT, ACTIVITY_CONTENT_TYPE)
            .body(task.payload.clone().into_bytes())
        {
            Ok(request) => request,
            Err(e) => {
                return AttemptOutcome::permanent(None, format!("Invalid inbox URL: {}", e));
            }
        };

        if let Err(e) = self.signer.sign(&mut request, &identity).await {
            return classify_signing_error(e);
        }

        let started = Instant::now();
        let result = self.transport.execute(request).await;
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["delivery"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(response) => classify_status(response.status()),
            Err(e) => classify_transport_error(e),
        }
    }

    async fn finish(
        &self,
        mut task: DeliveryTask,
        outcome: AttemptOutcome,
    ) -> Result<DeliveryTask, AppError> {
        let label = outcome_label(&outcome);
        let interrupted = outcome == AttemptOutcome::Interrupted;

        task.apply(outcome, self.clock.now(), &self.policy);
        self.queue.save(&task).await?;
        DELIVERY_ATTEMPTS_TOTAL.with_label_values(&[label]).inc();

        match task.state {
            DeliveryState::Delivered => {
                tracing::info!(task_id = %task.id, inbox = %task.inbox_url, "Delivered activity");
            }
            DeliveryState::DeadLettered => {
                DELIVERIES_DEAD_LETTERED.inc();
                tracing::warn!(
                    task_id = %task.id,
                    inbox = %task.inbox_url,
                    attempts = task.attempts,
                    error = task.last_error.as_deref().unwrap_or(""),
                    "Delivery dead-lettered"
                );
            }
            DeliveryState::Retrying if interrupted => {
                tracing::info!(task_id = %task.id, "Delivery interrupted by shutdown; requeued");
            }
            _ => {
                tracing::warn!(
                    task_id = %task.id,
                    inbox = %task.inbox_url,
                    attempts = task.attempts,
                    next_attempt_at = %task.next_attempt_at,
                    error = task.last_error.as_deref().unwrap_or(""),
                    "Delivery failed; retry scheduled"
                );
            }
        }

        Ok(task)
    }
}
