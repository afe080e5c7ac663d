//! Shared fixtures for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use lazy_static::lazy_static;
use serde_json::{Value, json};

use crate::federation::keys::{KeyMaterial, StoredKeyPair};
use crate::federation::transport::{HttpTransport, TransportError};

lazy_static! {
    static ref TEST_KEY: KeyMaterial = KeyMaterial::generate(2048).expect("test key generates");
    static ref OTHER_TEST_KEY: KeyMaterial =
        KeyMaterial::generate(2048).expect("test key generates");
}

/// A 2048-bit key pair generated once per test binary
pub fn test_key() -> KeyMaterial {
    TEST_KEY.clone()
}

/// A second key pair, distinct from [`test_key`]
pub fn other_test_key() -> KeyMaterial {
    OTHER_TEST_KEY.clone()
}

/// Mastodon-shaped actor document advertising `key` as `<actor_uri>#main-key`
pub fn actor_document(actor_uri: &str, key: &KeyMaterial) -> Value {
    json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "id": actor_uri,
        "type": "Person",
        "inbox": format!("{}/inbox", actor_uri),
        "endpoints": { "sharedInbox": "https://remote.example/inbox" },
        "publicKey": {
            "id": format!("{}#main-key", actor_uri),
            "owner": actor_uri,
            "publicKeyPem": key.public_key_pem().expect("public pem"),
        }
    })
}

/// Key pair record for local actor `actor_id` under `base_url`, backed by [`test_key`]
pub fn stored_test_key(base_url: &str, actor_id: &str) -> StoredKeyPair {
    let key = test_key();
    let actor_uri = format!("{}/users/{}", base_url, actor_id);
    StoredKeyPair {
        actor_id: actor_id.to_string(),
        key_id: format!("{}#main-key", actor_uri),
        actor_uri,
        generation: 1,
        public_key_pem: key.public_key_pem().expect("public pem"),
        private_key_pem: key.private_key_pem().expect("private pem"),
        created_at: chrono::Utc::now(),
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Response(u16, Vec<u8>),
    Error(TransportError),
}

/// Request captured by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// In-process transport answering from a per-URL script
///
/// Scripted outcomes are consumed in order; the last one repeats.
/// Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every answer so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, url: &str, outcome: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.push(url, Scripted::Response(status, body.into()));
    }

    pub fn respond_json(&self, url: &str, status: u16, body: &Value) {
        self.respond(url, status, serde_json::to_vec(body).unwrap());
    }

    pub fn fail(&self, url: &str, error: TransportError) {
        self.push(url, Scripted::Error(error));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    fn next_outcome(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Scripted::Response(404, Vec::new()),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        let url = request.uri().to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method().to_string(),
            url: url.clone(),
            headers: request.headers().clone(),
            body: request.body().clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome(&url) {
            Scripted::Response(status, body) => Ok(http::Response::builder()
                .status(status)
                .body(body)
                .unwrap()),
            Scripted::Error(error) => Err(error),
        }
    }
}
