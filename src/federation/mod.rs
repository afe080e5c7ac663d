//! ActivityPub federation module
//!
//! Handles:
//! - Local actor key pairs
//! - HTTP Signatures (signing and verification)
//! - Remote actor key fetching and caching
//! - WebFinger
//! - Inbox processing

pub mod clock;
pub mod codec;
pub mod inbox;
pub mod key_fetcher;
pub mod keys;
pub mod signer;
pub mod transport;
pub mod verifier;
pub mod webfinger;

pub use clock::{Clock, MockClock, SystemClock};
pub use inbox::{
    ActivityHandler, ActivityType, InboundActivity, InboxContext, InboxProcessor,
    key_id_matches_actor,
};
pub use key_fetcher::{ActorKeyFetcher, CacheStats, KeyLookup, RemoteActorKey};
pub use keys::{ActorIdentity, KeyMaterial, KeyPairManager, KeyStore, StoredKeyPair};
pub use signer::SignatureSigner;
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
pub use verifier::{SignatureVerifier, VerifiedSignature};
pub use webfinger::{
    WebFingerLink, WebFingerResolver, WebFingerResponse, WebFingerResult,
    generate_webfinger_response,
};
