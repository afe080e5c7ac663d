//! Local actor key pairs
//!
//! [`KeyPairManager`] generates RSA key pairs for local actors, hands them
//! to the [`KeyStore`] as PEM and decodes the private half again for each
//! signing call. Nothing here keeps a private key in memory between calls.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::clock::Clock;
use crate::config::MIN_KEY_BITS;
use crate::error::{AppError, FederationError};

/// Fragment appended to the actor URI to form its key id
const MAIN_KEY_FRAGMENT: &str = "#main-key";

/// The active signing identity of a local actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    /// Local identifier (username)
    pub actor_id: String,
    /// ActivityPub actor URI
    pub actor_uri: String,
    /// URI of the public key (`<actor_uri>#main-key`)
    pub key_id: String,
    /// Incremented on every rotation
    pub generation: i64,
    pub created_at: DateTime<Utc>,
}

/// A complete RSA key pair
///
/// Construction fails unless both halves are present and belong together.
#[derive(Clone)]
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl KeyMaterial {
    /// Generate a fresh key pair
    ///
    /// CPU heavy; call from a blocking thread.
    pub fn generate(bits: usize) -> Result<Self, FederationError> {
        if bits < MIN_KEY_BITS {
            return Err(FederationError::KeyGeneration(format!(
                "RSA modulus must be at least {} bits, got {}",
                MIN_KEY_BITS, bits
            )));
        }

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| FederationError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Rebuild key material from stored PEM halves
    pub fn from_pem(
        key_id: &str,
        public_key_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self, FederationError> {
        let parse_error = |reason: String| FederationError::KeyParse {
            key_id: key_id.to_string(),
            reason,
        };

        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| parse_error(format!("invalid private key: {}", e)))?;
        let public_key = decode_public_key_pem(public_key_pem).map_err(parse_error)?;

        if RsaPublicKey::from(&private_key) != public_key {
            return Err(parse_error(
                "public key does not belong to private key".to_string(),
            ));
        }

        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// SPKI PEM (`BEGIN PUBLIC KEY`), as published in actor documents
    pub fn public_key_pem(&self) -> Result<String, FederationError> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| FederationError::KeyGeneration(e.to_string()))
    }

    pub(crate) fn private_key_pem(&self) -> Result<String, FederationError> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| FederationError::KeyGeneration(e.to_string()))
    }

    pub fn into_private_key(self) -> RsaPrivateKey {
        self.private_key
    }
}

/// Decode an RSA public key in SPKI or PKCS#1 PEM form
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey, String> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("invalid public key: {}", e))
}

/// Key pair record handed to persistence
#[derive(Clone)]
pub struct StoredKeyPair {
    pub actor_id: String,
    pub actor_uri: String,
    pub key_id: String,
    pub generation: i64,
    pub public_key_pem: String,
    pub private_key_pem: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for StoredKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKeyPair")
            .field("actor_id", &self.actor_id)
            .field("key_id", &self.key_id)
            .field("generation", &self.generation)
            .field("private_key_pem", &"[redacted]")
            .finish_non_exhaustive()
    }
}

impl StoredKeyPair {
    pub fn identity(&self) -> ActorIdentity {
        ActorIdentity {
            actor_id: self.actor_id.clone(),
            actor_uri: self.actor_uri.clone(),
            key_id: self.key_id.clone(),
            generation: self.generation,
            created_at: self.created_at,
        }
    }
}

/// Durable storage for local actor key pairs
///
/// `save_key_pair` replaces the actor's active pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn save_key_pair(&self, record: StoredKeyPair) -> Result<(), AppError>;

    async fn load_key_pair(&self, actor_id: &str) -> Result<Option<StoredKeyPair>, AppError>;
}

/// Result of provisioning: the new identity and both key halves
#[derive(Debug)]
pub struct ProvisionedKeyPair {
    pub identity: ActorIdentity,
    pub material: KeyMaterial,
}

/// Owns the key lifecycle of local actors
pub struct KeyPairManager {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    base_url: String,
    key_bits: usize,
}

impl KeyPairManager {
    /// # Arguments
    /// * `base_url` - Instance base URL; actor URIs are `<base_url>/users/<id>`
    /// * `key_bits` - RSA modulus size, raised to 2048 if lower
    pub fn new(
        store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        key_bits: usize,
    ) -> Self {
        Self {
            store,
            clock,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_bits: key_bits.max(MIN_KEY_BITS),
        }
    }

    pub fn actor_uri(&self, actor_id: &str) -> String {
        format!("{}/users/{}", self.base_url, actor_id)
    }

    /// Generate and store a new key pair for `actor_id`
    ///
    /// Replaces any existing pair with the next generation.
    ///
    /// # Errors
    /// - `KeyGeneration` if RSA generation or PEM encoding fails
    /// - store errors are propagated unchanged
    pub async fn provision_key_pair(&self, actor_id: &str) -> Result<ProvisionedKeyPair, AppError> {
        let generation = match self.store.load_key_pair(actor_id).await? {
            Some(existing) => existing.generation + 1,
            None => 1,
        };

        let bits = self.key_bits;
        let material = tokio::task::spawn_blocking(move || KeyMaterial::generate(bits))
            .await
            .map_err(|e| FederationError::KeyGeneration(e.to_string()))??;

        let actor_uri = self.actor_uri(actor_id);
        let identity = ActorIdentity {
            actor_id: actor_id.to_string(),
            key_id: format!("{}{}", actor_uri, MAIN_KEY_FRAGMENT),
            actor_uri,
            generation,
            created_at: self.clock.now(),
        };

        self.store
            .save_key_pair(StoredKeyPair {
                actor_id: identity.actor_id.clone(),
                actor_uri: identity.actor_uri.clone(),
                key_id: identity.key_id.clone(),
                generation,
                public_key_pem: material.public_key_pem()?,
                private_key_pem: material.private_key_pem()?,
                created_at: identity.created_at,
            })
            .await?;

        tracing::info!(
            actor_id,
            key_id = %identity.key_id,
            generation,
            "Provisioned actor key pair"
        );

        Ok(ProvisionedKeyPair { identity, material })
    }

    /// Replace the actor's key pair
    ///
    /// Remote servers keep the old key cached until their own refresh;
    /// how long the old key stays acceptable is their policy.
    pub async fn rotate_key_pair(&self, actor_id: &str) -> Result<ProvisionedKeyPair, AppError> {
        self.provision_key_pair(actor_id).await
    }

    /// Return the actor's identity, provisioning a key pair on first use
    pub async fn ensure_key_pair(&self, actor_id: &str) -> Result<ActorIdentity, AppError> {
        match self.store.load_key_pair(actor_id).await? {
            Some(record) => Ok(record.identity()),
            None => Ok(self.provision_key_pair(actor_id).await?.identity),
        }
    }

    async fn load(&self, actor_id: &str) -> Result<StoredKeyPair, AppError> {
        self.store
            .load_key_pair(actor_id)
            .await?
            .ok_or_else(|| FederationError::KeyNotProvisioned(actor_id.to_string()).into())
    }

    /// Active identity of `actor_id`
    ///
    /// # Errors
    /// `KeyNotProvisioned` if the actor has no key pair
    pub async fn identity(&self, actor_id: &str) -> Result<ActorIdentity, AppError> {
        Ok(self.load(actor_id).await?.identity())
    }

    /// Public half, PEM encoded
    pub async fn public_key_pem(&self, actor_id: &str) -> Result<String, AppError> {
        Ok(self.load(actor_id).await?.public_key_pem)
    }

    /// Private half for a single signing operation
    ///
    /// The caller must drop the key once the signature is computed.
    ///
    /// # Errors
    /// `KeyNotProvisioned` if the actor has no key pair
    pub async fn private_key(&self, actor_id: &str) -> Result<RsaPrivateKey, AppError> {
        let record = self.load(actor_id).await?;
        let material =
            KeyMaterial::from_pem(&record.key_id, &record.public_key_pem, &record.private_key_pem)?;
        Ok(material.into_private_key())
    }
}
