//! Inbound HTTP Signature verification

use std::sync::Arc;

use chrono::Duration;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::Sha256;

use super::clock::Clock;
use super::codec::{self, HS2019, SIGNATURE_ALGORITHM};
use super::key_fetcher::{ActorKeyFetcher, RemoteActorKey};
use crate::config::FederationConfig;
use crate::error::FederationError;
use crate::metrics::SIGNATURE_VERIFICATIONS_TOTAL;

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub key_id: String,
    /// Actor owning the signing key
    pub actor_uri: String,
    pub key: Arc<RemoteActorKey>,
}

/// Checks signed inbound requests against remote actor keys
pub struct SignatureVerifier {
    fetcher: ActorKeyFetcher,
    clock: Arc<dyn Clock>,
    required_headers: Vec<String>,
    max_age: Duration,
    max_future_skew: Duration,
}

fn malformed(message: impl Into<String>) -> FederationError {
    FederationError::MalformedSignature(message.into())
}

fn rsa_sha256_verifies(key: &RsaPublicKey, signature_base: &str, signature: &[u8]) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key.clone())
        .verify(signature_base.as_bytes(), &signature)
        .is_ok()
}

impl SignatureVerifier {
    pub fn new(fetcher: ActorKeyFetcher, clock: Arc<dyn Clock>, config: &FederationConfig) -> Self {
        Self {
            fetcher,
            clock,
            required_headers: config
                .required_signed_headers
                .iter()
                .map(|name| name.trim().to_ascii_lowercase())
                .collect(),
            max_age: Duration::seconds(config.max_signature_age_secs as i64),
            max_future_skew: Duration::seconds(config.max_future_skew_secs as i64),
        }
    }

    /// Verify the signature on `request`
    ///
    /// Checks run cheapest first: header syntax, signed header set, date
    /// window and body digest all pass before any key is fetched. A
    /// mismatch against a cached key triggers exactly one forced refetch,
    /// which covers remote key rotation.
    ///
    /// # Errors
    /// - `MalformedSignature` for missing or unusable signature parameters
    /// - `ExpiredSignature` if `Date` is outside the skew window
    /// - `SignatureMismatch` if the digest or signature does not verify
    /// - `KeyFetch`/`KeyParse` if the key cannot be resolved
    pub async fn verify(
        &self,
        request: &http::Request<Vec<u8>>,
    ) -> Result<VerifiedSignature, FederationError> {
        let result = self.verify_request(request).await;

        match &result {
            Ok(verified) => {
                SIGNATURE_VERIFICATIONS_TOTAL
                    .with_label_values(&["valid"])
                    .inc();
                tracing::debug!(key_id = %verified.key_id, "Signature verified");
            }
            Err(e) => {
                SIGNATURE_VERIFICATIONS_TOTAL
                    .with_label_values(&[e.kind()])
                    .inc();
                tracing::info!(error = %e, path = %request.uri().path(), "Signature rejected");
            }
        }

        result
    }

    async fn verify_request(
        &self,
        request: &http::Request<Vec<u8>>,
    ) -> Result<VerifiedSignature, FederationError> {
        let headers = request.headers();
        let body = request.body();

        let params = codec::parse_signature_header(codec::signature_header_value(headers)?)?;

        if params.algorithm != SIGNATURE_ALGORITHM && params.algorithm != HS2019 {
            return Err(malformed(format!(
                "Unsupported signature algorithm: {}",
                params.algorithm
            )));
        }

        for required in &self.required_headers {
            if !params.headers.contains(required) {
                return Err(malformed(format!("Signed headers must include: {}", required)));
            }
        }
        if !body.is_empty() && !params.headers.iter().any(|h| h == "digest") {
            return Err(malformed("Signed headers must include: digest"));
        }

        let date = headers
            .get(http::header::DATE)
            .ok_or_else(|| malformed("Missing Date header"))?
            .to_str()
            .map_err(|_| malformed("Invalid Date header"))?;
        let signed_at =
            codec::parse_http_date(date).ok_or_else(|| malformed("Invalid Date format"))?;

        let now = self.clock.now();
        if now - signed_at > self.max_age {
            return Err(FederationError::ExpiredSignature(format!(
                "Date {} is older than {}s",
                date,
                self.max_age.num_seconds()
            )));
        }
        if signed_at - now > self.max_future_skew {
            return Err(FederationError::ExpiredSignature(format!(
                "Date {} is more than {}s in the future",
                date,
                self.max_future_skew.num_seconds()
            )));
        }

        if !body.is_empty() {
            let digest = headers
                .get("digest")
                .ok_or_else(|| malformed("Missing Digest header"))?
                .to_str()
                .map_err(|_| malformed("Invalid Digest header"))?;
            if !codec::digest_matches(digest, body) {
                return Err(FederationError::SignatureMismatch(
                    "Digest does not match body".to_string(),
                ));
            }
        }

        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let signature_base =
            codec::build_signature_base(request.method().as_str(), path, headers, &params.headers)?;

        let lookup = self.fetcher.get_public_key(&params.key_id, false).await?;
        let key = if rsa_sha256_verifies(&lookup.key.public_key, &signature_base, &params.signature)
        {
            lookup.key
        } else if lookup.from_cache {
            tracing::debug!(key_id = %params.key_id, "Cached key did not verify, refetching");
            let refreshed = self.fetcher.get_public_key(&params.key_id, true).await?;
            if !rsa_sha256_verifies(&refreshed.key.public_key, &signature_base, &params.signature)
            {
                return Err(FederationError::SignatureMismatch(
                    "Signature does not verify".to_string(),
                ));
            }
            refreshed.key
        } else {
            return Err(FederationError::SignatureMismatch(
                "Signature does not verify".to_string(),
            ));
        };

        Ok(VerifiedSignature {
            key_id: params.key_id,
            actor_uri: key.owner.clone(),
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::clock::MockClock;
    use crate::federation::keys::KeyMaterial;
    use crate::federation::signer::sign_with_key;
    use crate::test_support::{ScriptedTransport, actor_document, other_test_key, test_key};
    use http::HeaderValue;

    const ACTOR: &str = "https://remote.example/users/bob";
    const KEY_ID: &str = "https://remote.example/users/bob#main-key";

    struct Harness {
        transport: Arc<ScriptedTransport>,
        clock: MockClock,
        verifier: SignatureVerifier,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_json(ACTOR, 200, &actor_document(ACTOR, &test_key()));
        let clock = MockClock::default();
        let config = crate::config::tests::valid_config().federation;
        let fetcher = ActorKeyFetcher::new(transport.clone(), Arc::new(clock.clone()), &config);
        let verifier = SignatureVerifier::new(fetcher, Arc::new(clock.clone()), &config);
        Harness {
            transport,
            clock,
            verifier,
        }
    }

    fn signed_inbox_post(key: &KeyMaterial, clock: &MockClock, body: &[u8]) -> http::Request<Vec<u8>> {
        let mut request = http::Request::post("https://fit.example/users/alice/inbox")
            .body(body.to_vec())
            .expect("request builds");
        sign_with_key(&mut request, KEY_ID, key.clone().into_private_key(), clock.now())
            .expect("signs");
        // Server side sees origin-form URIs
        let (mut parts, body) = request.into_parts();
        parts.uri = "/users/alice/inbox".parse().expect("uri");
        http::Request::from_parts(parts, body)
    }

    const FOLLOW: &[u8] = br#"{"type":"Follow","actor":"https://remote.example/users/bob"}"#;

    #[tokio::test]
    async fn signed_request_verifies() {
        let h = harness();
        let request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);

        let verified = h.verifier.verify(&request).await.expect("verifies");
        assert_eq!(verified.key_id, KEY_ID);
        assert_eq!(verified.actor_uri, ACTOR);
    }

    #[tokio::test]
    async fn stale_and_future_dates_are_expired() {
        let h = harness();

        let request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        h.clock.advance(Duration::seconds(31));
        assert!(matches!(
            h.verifier.verify(&request).await,
            Err(FederationError::ExpiredSignature(_))
        ));

        h.clock.advance(Duration::seconds(-31 - 301));
        assert!(matches!(
            h.verifier.verify(&request).await,
            Err(FederationError::ExpiredSignature(_))
        ));
        assert_eq!(h.transport.request_count(ACTOR), 0);
    }

    #[tokio::test]
    async fn date_inside_window_is_accepted() {
        let h = harness();
        let request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);

        h.clock.advance(Duration::seconds(29));
        assert!(h.verifier.verify(&request).await.is_ok());

        h.clock.advance(Duration::seconds(-29 - 299));
        assert!(h.verifier.verify(&request).await.is_ok());
    }

    #[tokio::test]
    async fn mutated_signed_header_is_mismatch() {
        let h = harness();
        let mut request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        request
            .headers_mut()
            .insert("host", HeaderValue::from_static("other.example"));

        assert!(matches!(
            h.verifier.verify(&request).await,
            Err(FederationError::SignatureMismatch(_))
        ));
    }

    #[tokio::test]
    async fn tampered_body_fails_digest() {
        let h = harness();
        let request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        let (parts, _) = request.into_parts();
        let request = http::Request::from_parts(parts, br#"{"type":"Delete"}"#.to_vec());

        match h.verifier.verify(&request).await {
            Err(FederationError::SignatureMismatch(msg)) => assert!(msg.contains("Digest")),
            other => panic!("expected digest mismatch, got: {other:?}"),
        }
        assert_eq!(h.transport.request_count(ACTOR), 0);
    }

    #[tokio::test]
    async fn unsigned_and_unsupported_requests_are_malformed() {
        let h = harness();
        let unsigned = http::Request::post("/inbox")
            .body(FOLLOW.to_vec())
            .expect("request builds");
        assert!(matches!(
            h.verifier.verify(&unsigned).await,
            Err(FederationError::MalformedSignature(_))
        ));

        let mut request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        let value = request.headers()["signature"]
            .to_str()
            .expect("ascii")
            .replace("rsa-sha256", "ed25519");
        request
            .headers_mut()
            .insert("signature", HeaderValue::from_str(&value).expect("valid"));
        match h.verifier.verify(&request).await {
            Err(FederationError::MalformedSignature(msg)) => assert!(msg.contains("algorithm")),
            other => panic!("expected unsupported algorithm, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn signature_without_host_is_rejected_by_default() {
        let h = harness();
        let mut request = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        let value = request.headers()["signature"]
            .to_str()
            .expect("ascii")
            .replace("(request-target) host date", "(request-target) date");
        request
            .headers_mut()
            .insert("signature", HeaderValue::from_str(&value).expect("valid"));

        match h.verifier.verify(&request).await {
            Err(FederationError::MalformedSignature(msg)) => assert!(msg.contains("host")),
            other => panic!("expected missing signed host, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rotated_remote_key_costs_exactly_one_refetch() {
        let h = harness();
        h.transport
            .respond_json(ACTOR, 200, &actor_document(ACTOR, &other_test_key()));

        // Warm the cache with the old key
        let old = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        h.verifier.verify(&old).await.expect("old key verifies");
        assert_eq!(h.transport.request_count(ACTOR), 1);

        let rotated = signed_inbox_post(&other_test_key(), &h.clock, FOLLOW);
        h.verifier.verify(&rotated).await.expect("new key verifies");
        assert_eq!(h.transport.request_count(ACTOR), 2);

        h.verifier.verify(&rotated).await.expect("served from cache");
        assert_eq!(h.transport.request_count(ACTOR), 2);
    }

    #[tokio::test]
    async fn wrong_key_fails_after_single_refetch() {
        let h = harness();
        let good = signed_inbox_post(&test_key(), &h.clock, FOLLOW);
        h.verifier.verify(&good).await.expect("verifies");

        let forged = signed_inbox_post(&other_test_key(), &h.clock, FOLLOW);
        assert!(matches!(
            h.verifier.verify(&forged).await,
            Err(FederationError::SignatureMismatch(_))
        ));
        assert_eq!(h.transport.request_count(ACTOR), 2);
    }
}
