//! Prometheus metrics registry and instruments.
//!
//! Instruments are usable before [`init_metrics`] runs; registration only
//! makes them visible on `/metrics`.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbound
    pub static ref SIGNATURE_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_signature_verifications_total", "HTTP signature verifications by result"),
        &["result"]
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_activitypub_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");

    // Key cache
    pub static ref KEY_CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_key_cache_lookups_total", "Remote public key cache lookups"),
        &["result"]
    ).expect("metric can be created");
    pub static ref KEY_CACHE_ENTRIES: IntGauge = IntGauge::new(
        "fitpub_key_cache_entries",
        "Remote public keys currently cached"
    ).expect("metric can be created");
    pub static ref KEY_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_key_fetches_total", "Remote public key document fetches"),
        &["result"]
    ).expect("metric can be created");

    // Outbound
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_delivery_attempts_total", "Outbound delivery attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_DEAD_LETTERED: IntGauge = IntGauge::new(
        "fitpub_deliveries_dead_lettered",
        "Dead-lettered deliveries retained for inspection"
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fitpub_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Errors
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fitpub_errors_total", "Total number of errors returned to HTTP clients"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(register_all);
}

fn register_all() {
    REGISTRY
        .register(Box::new(SIGNATURE_VERIFICATIONS_TOTAL.clone()))
        .expect("SIGNATURE_VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()))
        .expect("ACTIVITYPUB_ACTIVITIES_RECEIVED can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_LOOKUPS_TOTAL.clone()))
        .expect("KEY_CACHE_LOOKUPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_ENTRIES.clone()))
        .expect("KEY_CACHE_ENTRIES can be registered");
    REGISTRY
        .register(Box::new(KEY_FETCHES_TOTAL.clone()))
        .expect("KEY_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))
        .expect("DELIVERY_ATTEMPTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DELIVERIES_DEAD_LETTERED.clone()))
        .expect("DELIVERIES_DEAD_LETTERED can be registered");
    REGISTRY
        .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
        .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
