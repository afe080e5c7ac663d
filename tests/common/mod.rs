//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;

use fitpub::federation::{SignatureSigner, SystemClock};
use fitpub::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Test server instance
///
/// Serves the real router over loopback with a SQLite database in a
/// temporary directory and delivery workers running.
pub struct TestServer {
    pub addr: String,
    pub domain: String,
    pub state: AppState,
    pub client: reqwest::Client,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    pub _temp_dir: TempDir,
}

impl TestServer {
    /// Create a test server hosting `alice`
    pub async fn new() -> Self {
        Self::with_actors(&["alice"]).await
    }

    /// Create a test server hosting the given local actors
    pub async fn with_actors(actors: &[&str]) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so actor URIs carry the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let domain = local_addr.to_string();

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: local_addr.port(),
                domain: domain.clone(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            federation: config::FederationConfig {
                user_agent: "FitPub/e2e".to_string(),
                connect_timeout_secs: 2,
                request_timeout_secs: 5,
                max_response_bytes: 1024 * 1024,
                allow_private_networks: true,
                webfinger_scheme: "http".to_string(),
                key_cache_ttl_secs: 3600,
                key_fetch_retry_delay_ms: 10,
                max_signature_age_secs: 30,
                max_future_skew_secs: 300,
                required_signed_headers: vec![
                    "(request-target)".to_string(),
                    "host".to_string(),
                    "date".to_string(),
                ],
                key_bits: 2048,
                local_actors: actors.iter().map(|a| a.to_string()).collect(),
            },
            delivery: config::DeliveryConfig {
                workers: 2,
                poll_interval_ms: 20,
                base_delay_secs: 1,
                max_delay_secs: 5,
                max_attempts: 3,
                jitter: 0.2,
                retention_days: 7,
                cleanup_interval_secs: 3600,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Spawn server and workers in background
        let app = fitpub::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = state.workers.clone().spawn(shutdown_rx);

        Self {
            addr: format!("http://{}", domain),
            domain,
            state,
            client,
            shutdown,
            workers,
            _temp_dir: temp_dir,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Actor URI of a local actor
    pub fn actor_uri(&self, actor_id: &str) -> String {
        self.url(&format!("/users/{}", actor_id))
    }

    /// Signer acting for this server's local actors
    pub fn signer(&self) -> SignatureSigner {
        SignatureSigner::new(self.state.keys.clone(), Arc::new(SystemClock))
    }

    /// Sign a POST of `body` to `url` as `actor_id`
    pub async fn signed_post(
        &self,
        actor_id: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> http::Request<Vec<u8>> {
        let identity = self.state.keys.identity(actor_id).await.unwrap();
        let mut request = http::Request::post(url)
            .header(http::header::CONTENT_TYPE, "application/activity+json")
            .body(serde_json::to_vec(body).unwrap())
            .unwrap();
        self.signer().sign(&mut request, &identity).await.unwrap();
        request
    }

    /// Send a prepared request with the plain client
    pub async fn send(&self, request: http::Request<Vec<u8>>) -> reqwest::Response {
        let (parts, body) = request.into_parts();
        self.client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .unwrap()
    }

    /// Stop the delivery workers
    pub async fn stop_workers(&mut self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers.drain(..) {
            worker.await.unwrap();
        }
    }
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: std::time::Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    check().await
}
