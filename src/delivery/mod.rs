//! Outbound activity delivery
//!
//! - `queue`: durable queue domain logic enqueues into
//! - `worker`: signing workers draining the queue
//! - `task`: per-task state machine and attempt history
//! - `backoff`: retry schedule

mod backoff;
mod queue;
mod task;
mod worker;

pub use backoff::RetryPolicy;
pub use queue::{DeliveryQueue, DeliveryStore};
pub use task::{AttemptOutcome, AttemptRecord, DeliveryState, DeliveryTask};
pub use worker::{ACTIVITY_CONTENT_TYPE, DeliveryWorkerPool, classify_status};
