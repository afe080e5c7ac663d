//! Data models
//!
//! Row types as stored in SQLite and their conversions to domain types.
//! Timestamps are stored as fixed-width RFC 3339 UTC text so that string
//! comparison in SQL orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::delivery::{AttemptRecord, DeliveryState, DeliveryTask};
use crate::error::AppError;
use crate::federation::StoredKeyPair;

/// Encode a timestamp for storage
pub(crate) fn encode_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid {} '{}': {}", column, value, e)))
}

// =============================================================================
// Actor keys
// =============================================================================

/// Active key pair of a local actor
#[derive(Clone, sqlx::FromRow)]
pub struct ActorKeyRow {
    pub actor_id: String,
    pub actor_uri: String,
    pub key_id: String,
    pub generation: i64,
    pub public_key_pem: String,
    /// RSA private key (PKCS#8 PEM)
    pub private_key_pem: String,
    pub created_at: String,
}

impl TryFrom<ActorKeyRow> for StoredKeyPair {
    type Error = AppError;

    fn try_from(row: ActorKeyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            created_at: decode_timestamp("created_at", &row.created_at)?,
            actor_id: row.actor_id,
            actor_uri: row.actor_uri,
            key_id: row.key_id,
            generation: row.generation,
            public_key_pem: row.public_key_pem,
            private_key_pem: row.private_key_pem,
        })
    }
}

// =============================================================================
// Delivery tasks
// =============================================================================

/// Queued delivery; `history` holds the attempt records as a JSON array
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeliveryTaskRow {
    pub id: String,
    pub inbox_url: String,
    pub payload: String,
    pub actor_id: String,
    pub state: String,
    pub attempts: i64,
    pub next_attempt_at: String,
    pub last_error: Option<String>,
    pub history: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<DeliveryTaskRow> for DeliveryTask {
    type Error = AppError;

    fn try_from(row: DeliveryTaskRow) -> Result<Self, Self::Error> {
        let state = DeliveryState::parse(&row.state).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "delivery task {} has unknown state '{}'",
                row.id,
                row.state
            ))
        })?;
        let history: Vec<AttemptRecord> = serde_json::from_str(&row.history).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "delivery task {} has invalid history: {}",
                row.id,
                e
            ))
        })?;

        Ok(Self {
            state,
            history,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            next_attempt_at: decode_timestamp("next_attempt_at", &row.next_attempt_at)?,
            created_at: decode_timestamp("created_at", &row.created_at)?,
            updated_at: decode_timestamp("updated_at", &row.updated_at)?,
            id: row.id,
            inbox_url: row.inbox_url,
            payload: row.payload,
            actor_id: row.actor_id,
            last_error: row.last_error,
        })
    }
}

pub(crate) fn encode_history(history: &[AttemptRecord]) -> Result<String, AppError> {
    serde_json::to_string(history)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode history: {}", e)))
}
