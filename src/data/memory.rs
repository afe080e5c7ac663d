//! In-memory stores
//!
//! Volatile [`KeyStore`] and [`DeliveryStore`] implementations for tests
//! and throwaway instances.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::delivery::{DeliveryState, DeliveryStore, DeliveryTask};
use crate::error::AppError;
use crate::federation::{KeyStore, StoredKeyPair};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key pairs keyed by actor id
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, StoredKeyPair>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn save_key_pair(&self, record: StoredKeyPair) -> Result<(), AppError> {
        lock(&self.keys).insert(record.actor_id.clone(), record);
        Ok(())
    }

    async fn load_key_pair(&self, actor_id: &str) -> Result<Option<StoredKeyPair>, AppError> {
        Ok(lock(&self.keys).get(actor_id).cloned())
    }
}

/// Delivery tasks keyed by id
#[derive(Default)]
pub struct MemoryDeliveryStore {
    tasks: Mutex<HashMap<String, DeliveryTask>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn insert_task(&self, task: &DeliveryTask) -> Result<(), AppError> {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&task.id) {
            return Err(AppError::Validation(format!("Duplicate task id {}", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryTask>, AppError> {
        let mut tasks = lock(&self.tasks);
        let due = tasks
            .values()
            .filter(|task| task.state.is_claimable() && task.next_attempt_at <= now)
            .min_by(|a, b| {
                a.next_attempt_at
                    .cmp(&b.next_attempt_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|task| task.id.clone());

        Ok(due.and_then(|id| {
            tasks.get_mut(&id).map(|task| {
                task.state = DeliveryState::InFlight;
                task.updated_at = now;
                task.clone()
            })
        }))
    }

    async fn update_task(&self, task: &DeliveryTask) -> Result<(), AppError> {
        match lock(&self.tasks).get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(AppError::NotFound),
        }
    }

    async fn get_task(&self, id: &str) -> Result<Option<DeliveryTask>, AppError> {
        Ok(lock(&self.tasks).get(id).cloned())
    }

    async fn list_tasks(
        &self,
        state: DeliveryState,
        limit: usize,
    ) -> Result<Vec<DeliveryTask>, AppError> {
        let mut matching: Vec<DeliveryTask> = lock(&self.tasks)
            .values()
            .filter(|task| task.state == state)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn count_tasks(&self, state: DeliveryState) -> Result<u64, AppError> {
        let count = lock(&self.tasks)
            .values()
            .filter(|task| task.state == state)
            .count();
        Ok(count as u64)
    }

    async fn delete_tasks_before(
        &self,
        state: DeliveryState,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tasks = lock(&self.tasks);
        let before = tasks.len();
        tasks.retain(|_, task| !(task.state == state && task.updated_at < cutoff));
        Ok((before - tasks.len()) as u64)
    }

    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut requeued = 0;
        for task in lock(&self.tasks).values_mut() {
            if task.state == DeliveryState::InFlight {
                task.state = DeliveryState::Retrying;
                task.next_attempt_at = now;
                task.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}
