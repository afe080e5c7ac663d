//! Delivery task state machine
//!
//! ```text
//! Pending -> InFlight -> Delivered
//!                     -> Retrying -> InFlight ...
//!                     -> DeadLettered
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backoff::RetryPolicy;
use crate::error::FederationError;

/// Lifecycle state of a [`DeliveryTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    InFlight,
    Delivered,
    Retrying,
    DeadLettered,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "delivered" => Some(Self::Delivered),
            "retrying" => Some(Self::Retrying),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }

    /// Eligible for claiming once due
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

/// One delivery attempt as recorded in the task history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub at: DateTime<Utc>,
    /// HTTP status, when a response arrived
    pub status: Option<u16>,
    pub error: Option<String>,
    /// State the task moved to after this attempt
    pub outcome: DeliveryState,
}

/// Classified result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx
    Delivered { status: u16 },
    /// Retrying would not help; no budget consumed
    Permanent {
        status: Option<u16>,
        error: FederationError,
    },
    /// May succeed later; consumes one attempt
    Transient {
        status: Option<u16>,
        error: FederationError,
    },
    /// Cancelled by shutdown; due again immediately, no budget consumed
    Interrupted,
}

impl AttemptOutcome {
    pub fn permanent(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            error: FederationError::PermanentDelivery(reason.into()),
        }
    }

    pub fn transient(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Transient {
            status,
            error: FederationError::TransientDelivery(reason.into()),
        }
    }
}

/// An activity queued for one remote inbox
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTask {
    /// ULID
    pub id: String,
    pub inbox_url: String,
    /// Serialized activity JSON
    pub payload: String,
    /// Local actor signing the delivery
    pub actor_id: String,
    pub state: DeliveryState,
    /// Failed attempts charged against the retry budget
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub history: Vec<AttemptRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryTask {
    pub fn new(
        actor_id: impl Into<String>,
        inbox_url: impl Into<String>,
        payload: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            inbox_url: inbox_url.into(),
            payload,
            actor_id: actor_id.into(),
            state: DeliveryState::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the outcome of an attempt made while the task was in flight
    pub fn apply(&mut self, outcome: AttemptOutcome, now: DateTime<Utc>, policy: &RetryPolicy) {
        let (status, error) = match outcome {
            AttemptOutcome::Delivered { status } => {
                self.state = DeliveryState::Delivered;
                self.last_error = None;
                (Some(status), None)
            }
            AttemptOutcome::Permanent { status, error } => {
                self.state = DeliveryState::DeadLettered;
                (status, Some(error.to_string()))
            }
            AttemptOutcome::Transient { status, error } => {
                self.attempts += 1;
                if policy.is_exhausted(self.attempts) {
                    self.state = DeliveryState::DeadLettered;
                } else {
                    let delay = policy.delay(self.attempts, &mut rand::thread_rng());
                    self.state = DeliveryState::Retrying;
                    self.next_attempt_at = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
                }
                (status, Some(error.to_string()))
            }
            AttemptOutcome::Interrupted => {
                self.state = DeliveryState::Retrying;
                self.next_attempt_at = now;
                (None, Some("interrupted by shutdown".to_string()))
            }
        };

        if error.is_some() {
            self.last_error = error.clone();
        }
        self.history.push(AttemptRecord {
            at: now,
            status,
            error,
            outcome: self.state,
        });
        self.updated_at = now;
    }
}
