//! Remote actor key resolution
//!
//! Fetches the public key behind a signature's `keyId`, caches it for the
//! configured TTL and coalesces concurrent fetches of the same key into a
//! single request. Cache locks are never held across the network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use http::header::ACCEPT;
use rsa::RsaPublicKey;
use serde_json::Value;
use tokio::sync::RwLock;

use super::clock::Clock;
use super::keys::decode_public_key_pem;
use super::transport::HttpTransport;
use crate::config::FederationConfig;
use crate::error::FederationError;
use crate::metrics::{
    FEDERATION_REQUEST_DURATION_SECONDS, KEY_CACHE_LOOKUPS_TOTAL, KEY_FETCHES_TOTAL,
};

/// Accept header for actor and key documents
pub const ACTIVITY_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// A remote actor's public key as advertised in its actor document
#[derive(Debug, Clone)]
pub struct RemoteActorKey {
    pub key_id: String,
    /// Actor URI owning the key
    pub owner: String,
    pub public_key: RsaPublicKey,
    pub public_key_pem: String,
    /// Personal inbox, when the key came from an actor document
    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub fresh_until: DateTime<Utc>,
}

impl RemoteActorKey {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.fresh_until
    }
}

/// Result of [`ActorKeyFetcher::get_public_key`]
#[derive(Debug, Clone)]
pub struct KeyLookup {
    pub key: Arc<RemoteActorKey>,
    /// Served from cache without a network request
    pub from_cache: bool,
}

/// Cache occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub in_flight: usize,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<RemoteActorKey>, FederationError>>>;

/// Remote key fetcher with a TTL cache
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ActorKeyFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    retry_delay: Duration,
    cache: RwLock<HashMap<String, Arc<RemoteActorKey>>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

enum FetchFailure {
    /// Worth one more try (transport failure, 5xx)
    Transient(String),
    Fatal(FederationError),
}

impl ActorKeyFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        config: &FederationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                transport,
                clock,
                ttl: chrono::Duration::seconds(config.key_cache_ttl_secs as i64),
                retry_delay: Duration::from_millis(config.key_fetch_retry_delay_ms),
                cache: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve the key behind `key_id`
    ///
    /// A fresh cache entry is returned unless `force_refresh` is set.
    /// Otherwise the key document is fetched; callers arriving while a
    /// fetch for the same key is running share its result.
    ///
    /// # Errors
    /// - `KeyFetch` on transport failure or non-2xx response
    /// - `KeyParse` if the document or PEM cannot be used
    pub async fn get_public_key(
        &self,
        key_id: &str,
        force_refresh: bool,
    ) -> Result<KeyLookup, FederationError> {
        if !force_refresh {
            if let Some(key) = self.cached(key_id).await {
                KEY_CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                return Ok(KeyLookup {
                    key,
                    from_cache: true,
                });
            }
            KEY_CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
        }

        let fetch = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(key_id) {
                Some(running) => running.clone(),
                None => {
                    let inner = self.inner.clone();
                    let owned_key_id = key_id.to_string();
                    let fetch = async move { inner.fetch_and_store(&owned_key_id).await }
                        .boxed()
                        .shared();
                    in_flight.insert(key_id.to_string(), fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if in_flight
                .get(key_id)
                .is_some_and(|running| running.ptr_eq(&fetch))
            {
                in_flight.remove(key_id);
            }
        }

        result.map(|key| KeyLookup {
            key,
            from_cache: false,
        })
    }

    async fn cached(&self, key_id: &str) -> Option<Arc<RemoteActorKey>> {
        let now = self.inner.clock.now();
        self.inner
            .cache
            .read()
            .await
            .get(key_id)
            .filter(|key| key.is_fresh(now))
            .cloned()
    }

    /// Drop a cached key; returns whether an entry existed
    pub async fn invalidate(&self, key_id: &str) -> bool {
        self.inner.cache.write().await.remove(key_id).is_some()
    }

    /// Remove expired entries; returns how many were dropped
    pub async fn prune_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut cache = self.inner.cache.write().await;
        let before = cache.len();
        cache.retain(|_, key| key.is_fresh(now));
        let pruned = before - cache.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired remote keys");
        }
        pruned
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.inner.clock.now();
        let (entries, fresh) = {
            let cache = self.inner.cache.read().await;
            (
                cache.len(),
                cache.values().filter(|key| key.is_fresh(now)).count(),
            )
        };
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        CacheStats {
            entries,
            fresh,
            in_flight,
        }
    }
}

impl FetcherInner {
    async fn fetch_and_store(&self, key_id: &str) -> Result<Arc<RemoteActorKey>, FederationError> {
        let started = Instant::now();
        let result = self.fetch_with_retry(key_id).await;
        FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["key_fetch"])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => KEY_FETCHES_TOTAL.with_label_values(&["success"]).inc(),
            Err(e) => {
                KEY_FETCHES_TOTAL.with_label_values(&[e.kind()]).inc();
                tracing::warn!(key_id, error = %e, "Remote key fetch failed");
            }
        }

        let key = Arc::new(result?);
        self.cache
            .write()
            .await
            .insert(key_id.to_string(), key.clone());
        tracing::debug!(key_id, owner = %key.owner, "Cached remote key");
        Ok(key)
    }

    async fn fetch_with_retry(&self, key_id: &str) -> Result<RemoteActorKey, FederationError> {
        let fetch_error = |reason: String| FederationError::KeyFetch {
            key_id: key_id.to_string(),
            reason,
        };

        match self.fetch_once(key_id).await {
            Ok(key) => Ok(key),
            Err(FetchFailure::Fatal(e)) => Err(e),
            Err(FetchFailure::Transient(reason)) => {
                tracing::debug!(key_id, %reason, "Retrying remote key fetch");
                tokio::time::sleep(self.retry_delay).await;
                self.fetch_once(key_id).await.map_err(|failure| match failure {
                    FetchFailure::Transient(reason) => fetch_error(reason),
                    FetchFailure::Fatal(e) => e,
                })
            }
        }
    }

    async fn fetch_once(&self, key_id: &str) -> Result<RemoteActorKey, FetchFailure> {
        let document_url = key_id.split('#').next().unwrap_or(key_id);
        let document = self.fetch_document(key_id, document_url).await?;

        let now = self.clock.now();
        let key = parse_key_document(key_id, &document, now, self.ttl).map_err(FetchFailure::Fatal)?;
        if document.get("publicKey").is_some() {
            return Ok(key);
        }

        // Standalone key documents only name their owner; the owner's actor
        // document must advertise the same key.
        let owner_document = self.fetch_document(key_id, &key.owner).await?;
        confirm_key_owner(key_id, &key, &owner_document, now, self.ttl).map_err(FetchFailure::Fatal)
    }

    async fn fetch_document(&self, key_id: &str, url: &str) -> Result<Value, FetchFailure> {
        let fatal = |reason: String| {
            FetchFailure::Fatal(FederationError::KeyFetch {
                key_id: key_id.to_string(),
                reason,
            })
        };

        let parsed =
            url::Url::parse(url).map_err(|e| fatal(format!("invalid key URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fatal(format!("unsupported scheme: {}", parsed.scheme())));
        }

        let request = http::Request::get(url)
            .header(ACCEPT, ACTIVITY_ACCEPT)
            .body(Vec::new())
            .map_err(|e| fatal(e.to_string()))?;

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => return Err(FetchFailure::Transient(e.to_string())),
            Err(e) => return Err(fatal(e.to_string())),
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchFailure::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(fatal(format!("HTTP {}", status)));
        }

        serde_json::from_slice(response.body()).map_err(|e| {
            FetchFailure::Fatal(FederationError::KeyParse {
                key_id: key_id.to_string(),
                reason: format!("invalid JSON: {}", e),
            })
        })
    }
}

/// Check a standalone key against the actor document of its claimed owner
///
/// The actor document must have the owner's id and list `key_id` with the
/// same public key. The returned key carries the actor's inboxes.
pub fn confirm_key_owner(
    key_id: &str,
    standalone: &RemoteActorKey,
    owner_document: &Value,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<RemoteActorKey, FederationError> {
    let parse_error = |reason: &str| FederationError::KeyParse {
        key_id: key_id.to_string(),
        reason: reason.to_string(),
    };

    if owner_document.get("publicKey").is_none()
        || owner_document.get("id").and_then(Value::as_str) != Some(standalone.owner.as_str())
    {
        return Err(parse_error("key owner is not an actor advertising keys"));
    }

    let advertised = parse_key_document(key_id, owner_document, now, ttl)
        .map_err(|_| parse_error("key owner does not advertise this key"))?;
    if advertised.public_key != standalone.public_key {
        return Err(parse_error("key owner advertises a different key"));
    }

    Ok(advertised)
}

/// Extract `key_id` from an actor document or a standalone key document
///
/// `publicKey` may be a single object or an array; the entry whose `id`
/// equals `key_id` is selected.
pub fn parse_key_document(
    key_id: &str,
    document: &Value,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<RemoteActorKey, FederationError> {
    let parse_error = |reason: &str| FederationError::KeyParse {
        key_id: key_id.to_string(),
        reason: reason.to_string(),
    };

    let is_actor = document.get("publicKey").is_some();
    let candidates: Vec<&Value> = match document.get("publicKey") {
        Some(Value::Array(keys)) => keys.iter().collect(),
        Some(key @ Value::Object(_)) => vec![key],
        Some(_) => return Err(parse_error("publicKey is neither object nor array")),
        None if document.get("publicKeyPem").is_some() => vec![document],
        None => return Err(parse_error("document carries no public key")),
    };

    let entry = candidates
        .into_iter()
        .find(|candidate| candidate.get("id").and_then(Value::as_str) == Some(key_id))
        .ok_or_else(|| parse_error("document does not advertise this key id"))?;

    let pem = entry
        .get("publicKeyPem")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("missing publicKeyPem"))?;
    let public_key = decode_public_key_pem(pem).map_err(|reason| parse_error(&reason))?;

    let actor_id = if is_actor {
        document.get("id").and_then(Value::as_str)
    } else {
        None
    };
    let owner = entry.get("owner").and_then(Value::as_str).or(actor_id);
    let owner = owner.ok_or_else(|| parse_error("key has no owner"))?;
    if let Some(actor_id) = actor_id {
        if owner != actor_id {
            return Err(parse_error("key owner does not match actor id"));
        }
    }

    let (inbox, shared_inbox) = if is_actor {
        (
            document
                .get("inbox")
                .and_then(Value::as_str)
                .map(str::to_string),
            document
                .pointer("/endpoints/sharedInbox")
                .and_then(Value::as_str)
                .map(str::to_string),
        )
    } else {
        (None, None)
    };

    Ok(RemoteActorKey {
        key_id: key_id.to_string(),
        owner: owner.to_string(),
        public_key,
        public_key_pem: pem.to_string(),
        inbox,
        shared_inbox,
        fetched_at: now,
        fresh_until: now + ttl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::clock::MockClock;
    use crate::federation::transport::TransportError;
    use crate::test_support::{ScriptedTransport, actor_document, other_test_key, test_key};
    use serde_json::json;

    const ACTOR: &str = "https://remote.example/users/bob";
    const KEY_ID: &str = "https://remote.example/users/bob#main-key";

    fn fetcher(transport: Arc<ScriptedTransport>, clock: MockClock) -> ActorKeyFetcher {
        let config = crate::config::tests::valid_config().federation;
        ActorKeyFetcher::new(transport, Arc::new(clock), &config)
    }

    #[tokio::test]
    async fn fetches_once_then_serves_from_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let fetcher = fetcher(transport.clone(), MockClock::default());

        let first = fetcher.get_public_key(KEY_ID, false).await.expect("fetches");
        let second = fetcher.get_public_key(KEY_ID, false).await.expect("cached");

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.key.owner, ACTOR);
        assert_eq!(first.key.inbox.as_deref(), Some("https://remote.example/users/bob/inbox"));
        assert_eq!(
            first.key.shared_inbox.as_deref(),
            Some("https://remote.example/inbox")
        );
        assert_eq!(&first.key.public_key, test_key().public_key());
        assert_eq!(transport.request_count(ACTOR), 1);

        let request = &transport.requests()[0];
        assert!(
            request.headers["accept"]
                .to_str()
                .expect("ascii")
                .starts_with("application/activity+json")
        );
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let clock = MockClock::default();
        let fetcher = fetcher(transport.clone(), clock.clone());

        fetcher.get_public_key(KEY_ID, false).await.expect("fetches");
        clock.advance(chrono::Duration::seconds(3601));

        assert_eq!(fetcher.stats().await.fresh, 0);
        let lookup = fetcher.get_public_key(KEY_ID, false).await.expect("refetches");
        assert!(!lookup.from_cache);
        assert_eq!(transport.request_count(ACTOR), 2);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_request() {
        let transport =
            Arc::new(ScriptedTransport::new().with_delay(Duration::from_millis(50)));
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let fetcher = fetcher(transport.clone(), MockClock::default());

        let (a, b, c) = tokio::join!(
            fetcher.get_public_key(KEY_ID, false),
            fetcher.get_public_key(KEY_ID, false),
            fetcher.get_public_key(KEY_ID, true),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(transport.request_count(ACTOR), 1);
        assert_eq!(fetcher.stats().await.in_flight, 0);
    }

    #[tokio::test]
    async fn force_refresh_picks_up_rotated_key() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &other_test_key()));
        let fetcher = fetcher(transport.clone(), MockClock::default());

        fetcher.get_public_key(KEY_ID, false).await.expect("fetches");
        let refreshed = fetcher.get_public_key(KEY_ID, true).await.expect("refetches");

        assert_eq!(&refreshed.key.public_key, other_test_key().public_key());
        let cached = fetcher.get_public_key(KEY_ID, false).await.expect("cached");
        assert_eq!(&cached.key.public_key, other_test_key().public_key());
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(ACTOR, 503, "busy");
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let fetcher = fetcher(transport.clone(), MockClock::default());

        fetcher.get_public_key(KEY_ID, false).await.expect("second try succeeds");
        assert_eq!(transport.request_count(ACTOR), 2);
    }

    #[tokio::test]
    async fn persistent_transport_failure_gives_key_fetch_after_two_tries() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ACTOR, TransportError::Timeout);
        let fetcher = fetcher(transport.clone(), MockClock::default());

        match fetcher.get_public_key(KEY_ID, false).await {
            Err(FederationError::KeyFetch { key_id, .. }) => assert_eq!(key_id, KEY_ID),
            other => panic!("expected KeyFetch, got: {other:?}"),
        }
        assert_eq!(transport.request_count(ACTOR), 2);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(ACTOR, 404, "");
        let fetcher = fetcher(transport.clone(), MockClock::default());

        assert!(matches!(
            fetcher.get_public_key(KEY_ID, false).await,
            Err(FederationError::KeyFetch { .. })
        ));
        assert_eq!(transport.request_count(ACTOR), 1);
    }

    #[tokio::test]
    async fn garbage_body_is_key_parse() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(ACTOR, 200, "<html>");
        let fetcher = fetcher(transport.clone(), MockClock::default());

        assert!(matches!(
            fetcher.get_public_key(KEY_ID, false).await,
            Err(FederationError::KeyParse { .. })
        ));
    }

    #[tokio::test]
    async fn invalidate_and_prune() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let clock = MockClock::default();
        let fetcher = fetcher(transport, clock.clone());

        fetcher.get_public_key(KEY_ID, false).await.expect("fetches");
        assert_eq!(
            fetcher.stats().await,
            CacheStats {
                entries: 1,
                fresh: 1,
                in_flight: 0
            }
        );

        assert!(fetcher.invalidate(KEY_ID).await);
        assert!(!fetcher.invalidate(KEY_ID).await);

        fetcher.get_public_key(KEY_ID, false).await.expect("fetches");
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(fetcher.prune_expired().await, 1);
        assert_eq!(fetcher.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn standalone_key_is_confirmed_by_owner_document() {
        const STANDALONE_KEY: &str = "https://remote.example/keys/bob";
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(
            STANDALONE_KEY,
            200,
            &json!({
                "id": STANDALONE_KEY,
                "owner": ACTOR,
                "publicKeyPem": test_key().public_key_pem().unwrap(),
            }),
        );
        let mut owner = actor_document(ACTOR, &test_key());
        owner["publicKey"]["id"] = json!(STANDALONE_KEY);
        transport.respond_json(ACTOR, 200, &owner);
        let fetcher = fetcher(transport.clone(), MockClock::default());

        let lookup = fetcher
            .get_public_key(STANDALONE_KEY, false)
            .await
            .expect("owner confirms key");

        assert_eq!(lookup.key.owner, ACTOR);
        assert_eq!(
            lookup.key.inbox.as_deref(),
            Some("https://remote.example/users/bob/inbox")
        );
        assert_eq!(transport.request_count(STANDALONE_KEY), 1);
        assert_eq!(transport.request_count(ACTOR), 1);
    }

    #[tokio::test]
    async fn standalone_key_claiming_foreign_owner_is_rejected() {
        const FOREIGN_KEY: &str = "https://evil.example/keys/1";
        const VICTIM: &str = "https://victim.example/users/v";
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(
            FOREIGN_KEY,
            200,
            &json!({
                "id": FOREIGN_KEY,
                "owner": VICTIM,
                "publicKeyPem": other_test_key().public_key_pem().unwrap(),
            }),
        );
        transport.respond_json(VICTIM, 200, &actor_document(VICTIM, &test_key()));
        let fetcher = fetcher(transport.clone(), MockClock::default());

        assert!(matches!(
            fetcher.get_public_key(FOREIGN_KEY, false).await,
            Err(FederationError::KeyParse { .. })
        ));
        assert_eq!(fetcher.stats().await.entries, 0);
    }

    #[test]
    fn owner_must_advertise_the_same_key_material() {
        const STANDALONE_KEY: &str = "https://remote.example/keys/bob";
        let now = Utc::now();
        let ttl = chrono::Duration::hours(1);
        let standalone = parse_key_document(
            STANDALONE_KEY,
            &json!({
                "id": STANDALONE_KEY,
                "owner": ACTOR,
                "publicKeyPem": other_test_key().public_key_pem().unwrap(),
            }),
            now,
            ttl,
        )
        .expect("parses");

        let mut owner = actor_document(ACTOR, &test_key());
        owner["publicKey"]["id"] = json!(STANDALONE_KEY);
        assert!(confirm_key_owner(STANDALONE_KEY, &standalone, &owner, now, ttl).is_err());

        let mut renamed = actor_document("https://remote.example/users/eve", &other_test_key());
        renamed["publicKey"]["id"] = json!(STANDALONE_KEY);
        assert!(confirm_key_owner(STANDALONE_KEY, &standalone, &renamed, now, ttl).is_err());
    }

    #[test]
    fn selects_matching_entry_from_key_array() {
        let document = json!({
            "id": ACTOR,
            "inbox": format!("{}/inbox", ACTOR),
            "publicKey": [
                {
                    "id": format!("{}#other-key", ACTOR),
                    "owner": ACTOR,
                    "publicKeyPem": other_test_key().public_key_pem().unwrap(),
                },
                {
                    "id": KEY_ID,
                    "owner": ACTOR,
                    "publicKeyPem": test_key().public_key_pem().unwrap(),
                }
            ]
        });

        let key = parse_key_document(KEY_ID, &document, Utc::now(), chrono::Duration::hours(1))
            .expect("parses");
        assert_eq!(&key.public_key, test_key().public_key());
    }

    #[test]
    fn accepts_standalone_key_document_with_pkcs1_pem() {
        use rsa::pkcs1::EncodeRsaPublicKey;
        use rsa::pkcs8::LineEnding;

        let pkcs1 = test_key()
            .public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .unwrap();
        let document = json!({
            "id": KEY_ID,
            "owner": ACTOR,
            "publicKeyPem": pkcs1,
        });

        let key = parse_key_document(KEY_ID, &document, Utc::now(), chrono::Duration::hours(1))
            .expect("parses");
        assert_eq!(key.owner, ACTOR);
        assert!(key.inbox.is_none());
    }

    #[test]
    fn rejects_unadvertised_key_id_and_foreign_owner() {
        let document = actor_document(ACTOR, &test_key());
        assert!(matches!(
            parse_key_document(
                "https://remote.example/users/bob#other",
                &document,
                Utc::now(),
                chrono::Duration::hours(1)
            ),
            Err(FederationError::KeyParse { .. })
        ));

        let mut document = actor_document(ACTOR, &test_key());
        document["publicKey"]["owner"] = json!("https://evil.example/users/mallory");
        assert!(matches!(
            parse_key_document(KEY_ID, &document, Utc::now(), chrono::Duration::hours(1)),
            Err(FederationError::KeyParse { .. })
        ));
    }
}
