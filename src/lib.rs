//! FitPub - ActivityPub federation core for a self-hosted fitness tracker
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - WebFinger, actor documents                               │
//! │  - Personal and shared inboxes                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Federation Core                          │
//! │  - Key pairs, HTTP Signatures, key fetching                 │
//! │  - Inbox processing, delivery queue and workers             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - In-memory stores                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for ActivityPub and WebFinger
//! - `federation`: signing, verification, discovery, inbox
//! - `delivery`: durable outbound delivery
//! - `service`: domain logic consuming inbound activities
//! - `data`: persistence
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod delivery;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use delivery::{DeliveryQueue, DeliveryStore, DeliveryWorkerPool};
use federation::{
    ActorKeyFetcher, Clock, HttpTransport, InboxProcessor, KeyPairManager, KeyStore,
    SignatureSigner, SignatureVerifier, WebFingerResolver,
};

/// Upper bound for inbound request bodies
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// Cloned for each request; every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Local actor key pairs
    pub keys: Arc<KeyPairManager>,

    /// Remote public keys (shared cache)
    pub key_fetcher: ActorKeyFetcher,

    /// Remote actor discovery
    pub webfinger: Arc<WebFingerResolver>,

    /// Verified inbound activities
    pub inbox: Arc<InboxProcessor>,

    /// Outbound delivery queue
    pub queue: Arc<DeliveryQueue>,

    /// Workers draining `queue`
    pub workers: Arc<DeliveryWorkerPool>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the outbound HTTP transport
    /// 3. Wire the federation core
    /// 4. Provision keys and recover interrupted deliveries
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        let transport = Arc::new(federation::ReqwestTransport::new(&config.federation)?);

        let state = Self::assemble(
            config,
            db.clone(),
            db,
            transport,
            Arc::new(federation::SystemClock),
        );
        state.prepare().await?;

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Wire the federation core from its collaborators
    ///
    /// Inbound activities go to a [`service::FollowAcceptor`].
    pub fn assemble(
        config: config::AppConfig,
        key_store: Arc<dyn KeyStore>,
        delivery_store: Arc<dyn DeliveryStore>,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = Arc::new(KeyPairManager::new(
            key_store,
            clock.clone(),
            config.server.base_url(),
            config.federation.key_bits,
        ));
        let signer = Arc::new(SignatureSigner::new(keys.clone(), clock.clone()));
        let key_fetcher = ActorKeyFetcher::new(transport.clone(), clock.clone(), &config.federation);
        let verifier = Arc::new(SignatureVerifier::new(
            key_fetcher.clone(),
            clock.clone(),
            &config.federation,
        ));
        let webfinger = Arc::new(WebFingerResolver::new(transport.clone(), &config.federation));

        let queue = Arc::new(DeliveryQueue::new(delivery_store, clock.clone()));
        let workers = Arc::new(DeliveryWorkerPool::new(
            queue.clone(),
            keys.clone(),
            signer,
            transport,
            clock.clone(),
            &config.delivery,
        ));

        let handler = Arc::new(service::FollowAcceptor::new(keys.clone(), queue.clone()));
        let inbox = Arc::new(InboxProcessor::new(verifier, handler, clock));

        Self {
            config: Arc::new(config),
            keys,
            key_fetcher,
            webfinger,
            inbox,
            queue,
            workers,
        }
    }

    /// Provision key pairs for configured local actors and requeue
    /// deliveries a previous run left in flight
    ///
    /// Must run before the delivery workers start.
    pub async fn prepare(&self) -> Result<(), error::AppError> {
        for actor_id in &self.config.federation.local_actors {
            let identity = self.keys.ensure_key_pair(actor_id).await?;
            tracing::info!(
                actor_id,
                key_id = %identity.key_id,
                generation = identity.generation,
                "Local actor ready"
            );
        }

        self.queue.recover_interrupted().await?;
        Ok(())
    }

    /// Whether `username` is a configured local actor
    pub fn is_local_actor(&self, username: &str) -> bool {
        self.config
            .federation
            .local_actors
            .iter()
            .any(|actor| actor == username)
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .merge(api::metrics_router())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
