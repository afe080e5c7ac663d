//! Outbound request signing
//!
//! Signs `(request-target) host date [digest]` with RSASSA-PKCS1-v1_5 over
//! SHA-256, the construction Mastodon and most of the Fediverse verify.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::HeaderValue;
use http::header::{DATE, HOST};
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use sha2::Sha256;

use super::clock::Clock;
use super::codec::{self, REQUEST_TARGET, SIGNATURE_ALGORITHM, SignatureComponents, SignatureParams};
use super::keys::{ActorIdentity, KeyPairManager};
use crate::error::{AppError, FederationError};

/// Signs outbound requests on behalf of local actors
pub struct SignatureSigner {
    keys: Arc<KeyPairManager>,
    clock: Arc<dyn Clock>,
}

impl SignatureSigner {
    pub fn new(keys: Arc<KeyPairManager>, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    /// Sign `request` in place as `identity`
    ///
    /// Adds `Host`, `Date` (when absent) and `Digest` (for non-empty
    /// bodies), then the `Signature` header.
    ///
    /// # Errors
    /// - `KeyNotProvisioned` if the actor has no key pair
    /// - `Signing` if the RSA operation fails
    pub async fn sign(
        &self,
        request: &mut http::Request<Vec<u8>>,
        identity: &ActorIdentity,
    ) -> Result<(), AppError> {
        let private_key = self.keys.private_key(&identity.actor_id).await?;
        sign_with_key(request, &identity.key_id, private_key, self.clock.now())?;
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, FederationError> {
    HeaderValue::from_str(value)
        .map_err(|_| FederationError::MalformedSignature(format!("Invalid header value: {}", value)))
}

/// Value for the `Host` header: target host plus any explicit port
fn host_header(uri: &http::Uri) -> Result<String, FederationError> {
    let host = uri
        .host()
        .ok_or_else(|| FederationError::MalformedSignature("Target URL has no host".to_string()))?;

    Ok(match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Sign `request` with an explicit key
///
/// The key is consumed and dropped when signing completes.
pub fn sign_with_key(
    request: &mut http::Request<Vec<u8>>,
    key_id: &str,
    private_key: RsaPrivateKey,
    now: DateTime<Utc>,
) -> Result<(), FederationError> {
    if !request.headers().contains_key(HOST) {
        let host = host_header(request.uri())?;
        request.headers_mut().insert(HOST, header_value(&host)?);
    }

    if !request.headers().contains_key(DATE) {
        let date = codec::format_http_date(now);
        request.headers_mut().insert(DATE, header_value(&date)?);
    }

    let mut names = vec![REQUEST_TARGET, "host", "date"];
    if !request.body().is_empty() {
        let digest = codec::generate_digest(request.body());
        request.headers_mut().insert("digest", header_value(&digest)?);
        names.push("digest");
    }

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let components = SignatureComponents::collect(
        request.method().as_str(),
        path,
        request.headers(),
        &names[..],
        key_id,
        now,
    )?;
    let headers = components.header_names();
    let signature_base = components.into_signature_base();

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key
        .try_sign_with_rng(&mut rand::thread_rng(), signature_base.as_bytes())
        .map_err(|e| FederationError::Signing(e.to_string()))?;

    let params = SignatureParams {
        key_id: key_id.to_string(),
        algorithm: SIGNATURE_ALGORITHM.to_string(),
        headers,
        signature: signature.to_bytes().into_vec(),
    };
    request
        .headers_mut()
        .insert("signature", header_value(&params.to_header_value())?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryKeyStore;
    use crate::federation::clock::MockClock;
    use crate::federation::codec::{digest_matches, parse_signature_header};
    use crate::test_support::test_key;

    fn post(url: &str, body: &[u8]) -> http::Request<Vec<u8>> {
        http::Request::post(url).body(body.to_vec()).expect("request builds")
    }

    fn signature_params(request: &http::Request<Vec<u8>>) -> SignatureParams {
        let value = request
            .headers()
            .get("signature")
            .expect("signature header")
            .to_str()
            .expect("ascii");
        parse_signature_header(value).expect("parses")
    }

    #[test]
    fn signs_body_with_digest_and_standard_header_set() {
        let body = br#"{"type":"Create"}"#;
        let mut request = post("https://remote.example/users/bob/inbox", body);

        sign_with_key(
            &mut request,
            "https://fit.example/users/alice#main-key",
            test_key().into_private_key(),
            Utc::now(),
        )
        .expect("signs");

        let params = signature_params(&request);
        assert_eq!(params.key_id, "https://fit.example/users/alice#main-key");
        assert_eq!(params.algorithm, "rsa-sha256");
        assert_eq!(params.headers, vec!["(request-target)", "host", "date", "digest"]);
        assert_eq!(params.signature.len(), 256);
        assert_eq!(request.headers()["host"], "remote.example");

        let digest = request.headers()["digest"].to_str().expect("ascii");
        assert!(digest_matches(digest, body));
    }

    #[test]
    fn empty_body_is_signed_without_digest() {
        let mut request = http::Request::get("http://127.0.0.1:8443/users/bob")
            .body(Vec::new())
            .expect("request builds");

        sign_with_key(&mut request, "k", test_key().into_private_key(), Utc::now())
            .expect("signs");

        assert_eq!(signature_params(&request).headers, vec!["(request-target)", "host", "date"]);
        assert!(!request.headers().contains_key("digest"));
        assert_eq!(request.headers()["host"], "127.0.0.1:8443");
    }

    #[test]
    fn existing_host_and_date_are_kept() {
        let mut request = post("https://remote.example/inbox", b"{}");
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("alias.example"));
        request
            .headers_mut()
            .insert(DATE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));

        sign_with_key(&mut request, "k", test_key().into_private_key(), Utc::now())
            .expect("signs");

        assert_eq!(request.headers()["host"], "alias.example");
        assert_eq!(request.headers()["date"], "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn key_too_small_for_digest_is_a_signing_error() {
        let tiny = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 256).expect("generates");
        let mut request = post("https://remote.example/inbox", b"{}");

        match sign_with_key(&mut request, "k", tiny, Utc::now()) {
            Err(FederationError::Signing(_)) => {}
            other => panic!("expected Signing, got: {other:?}"),
        }
        assert!(request.headers().get("signature").is_none());
    }

    #[tokio::test]
    async fn signer_uses_clock_and_stored_key() {
        let clock = MockClock::default();
        let keys = Arc::new(KeyPairManager::new(
            Arc::new(MemoryKeyStore::new()),
            Arc::new(clock.clone()),
            "https://fit.example",
            2048,
        ));
        let identity = keys.ensure_key_pair("alice").await.expect("provisioned");
        let signer = SignatureSigner::new(keys, Arc::new(clock.clone()));

        let mut request = post("https://remote.example/inbox", b"{}");
        signer.sign(&mut request, &identity).await.expect("signs");

        assert_eq!(
            request.headers()["date"].to_str().expect("ascii"),
            codec::format_http_date(clock.now())
        );
        assert_eq!(signature_params(&request).key_id, identity.key_id);
    }

    #[tokio::test]
    async fn signer_propagates_missing_key() {
        let clock = Arc::new(MockClock::default());
        let keys = Arc::new(KeyPairManager::new(
            Arc::new(MemoryKeyStore::new()),
            clock.clone(),
            "https://fit.example",
            2048,
        ));
        let signer = SignatureSigner::new(keys.clone(), clock);
        let identity = ActorIdentity {
            actor_id: "ghost".to_string(),
            actor_uri: keys.actor_uri("ghost"),
            key_id: format!("{}#main-key", keys.actor_uri("ghost")),
            generation: 1,
            created_at: Utc::now(),
        };

        let mut request = post("https://remote.example/inbox", b"{}");
        match signer.sign(&mut request, &identity).await {
            Err(AppError::Federation(FederationError::KeyNotProvisioned(actor))) => {
                assert_eq!(actor, "ghost")
            }
            other => panic!("expected KeyNotProvisioned, got: {other:?}"),
        }
        assert!(!request.headers().contains_key("signature"));
    }
}
