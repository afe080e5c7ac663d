//! SQLite database operations
//!
//! All persistent state goes through this module: local actor key pairs
//! and the delivery queue.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};

use super::models::{ActorKeyRow, DeliveryTaskRow, encode_history, encode_timestamp};
use crate::delivery::{DeliveryState, DeliveryStore, DeliveryTask};
use crate::error::AppError;
use crate::federation::{KeyStore, StoredKeyPair};

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }
}

// =========================================================================
// Actor keys
// =========================================================================

#[async_trait]
impl KeyStore for Database {
    async fn save_key_pair(&self, record: StoredKeyPair) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO actor_keys (
                actor_id, actor_uri, key_id, generation,
                public_key_pem, private_key_pem, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.actor_id)
        .bind(&record.actor_uri)
        .bind(&record.key_id)
        .bind(record.generation)
        .bind(&record.public_key_pem)
        .bind(&record.private_key_pem)
        .bind(encode_timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_key_pair(&self, actor_id: &str) -> Result<Option<StoredKeyPair>, AppError> {
        let row = sqlx::query_as::<_, ActorKeyRow>("SELECT * FROM actor_keys WHERE actor_id = ?")
            .bind(actor_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredKeyPair::try_from).transpose()
    }
}

// =========================================================================
// Delivery queue
// =========================================================================

#[async_trait]
impl DeliveryStore for Database {
    async fn insert_task(&self, task: &DeliveryTask) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_tasks (
                id, inbox_url, payload, actor_id, state, attempts,
                next_attempt_at, last_error, history, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.inbox_url)
        .bind(&task.payload)
        .bind(&task.actor_id)
        .bind(task.state.as_str())
        .bind(i64::from(task.attempts))
        .bind(encode_timestamp(task.next_attempt_at))
        .bind(&task.last_error)
        .bind(encode_history(&task.history)?)
        .bind(encode_timestamp(task.created_at))
        .bind(encode_timestamp(task.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryTask>, AppError> {
        let now = encode_timestamp(now);
        // Single statement, so concurrent workers cannot claim the same row.
        let row = sqlx::query_as::<_, DeliveryTaskRow>(
            r#"
            UPDATE delivery_tasks
            SET state = 'in_flight', updated_at = ?1
            WHERE id = (
                SELECT id FROM delivery_tasks
                WHERE state IN ('pending', 'retrying') AND next_attempt_at <= ?1
                ORDER BY next_attempt_at, id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeliveryTask::try_from).transpose()
    }

    async fn update_task(&self, task: &DeliveryTask) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_tasks
            SET state = ?, attempts = ?, next_attempt_at = ?, last_error = ?,
                history = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.state.as_str())
        .bind(i64::from(task.attempts))
        .bind(encode_timestamp(task.next_attempt_at))
        .bind(&task.last_error)
        .bind(encode_history(&task.history)?)
        .bind(encode_timestamp(task.updated_at))
        .bind(&task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<DeliveryTask>, AppError> {
        let row = sqlx::query_as::<_, DeliveryTaskRow>("SELECT * FROM delivery_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DeliveryTask::try_from).transpose()
    }

    async fn list_tasks(
        &self,
        state: DeliveryState,
        limit: usize,
    ) -> Result<Vec<DeliveryTask>, AppError> {
        let rows = sqlx::query_as::<_, DeliveryTaskRow>(
            "SELECT * FROM delivery_tasks WHERE state = ? ORDER BY created_at, id LIMIT ?",
        )
        .bind(state.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryTask::try_from).collect()
    }

    async fn count_tasks(&self, state: DeliveryState) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_tasks WHERE state = ?")
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_tasks_before(
        &self,
        state: DeliveryState,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM delivery_tasks WHERE state = ? AND updated_at < ?")
            .bind(state.as_str())
            .bind(encode_timestamp(cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn requeue_in_flight(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let now = encode_timestamp(now);
        let result = sqlx::query(
            r#"
            UPDATE delivery_tasks
            SET state = 'retrying', next_attempt_at = ?1, updated_at = ?1
            WHERE state = 'in_flight'
            "#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
