//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from addresses, and to answer
//! the same query for local accounts.

use std::sync::Arc;

use http::StatusCode;
use http::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::transport::HttpTransport;
use crate::config::FederationConfig;
use crate::error::FederationError;

const JRD_ACCEPT: &str = "application/jrd+json, application/json";
const ACTIVITY_JSON: &str = "application/activity+json";
const LD_JSON: &str = "application/ld+json";
const ACTIVITYSTREAMS_PROFILE: &str = "https://www.w3.org/ns/activitystreams";
const PROFILE_PAGE_REL: &str = "http://webfinger.net/rel/profile-page";

/// WebFinger result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebFingerResult {
    /// Subject (acct:user@domain)
    pub subject: String,
    pub aliases: Vec<String>,
    /// ActivityPub actor URI
    pub actor_uri: String,
    /// Profile page URL (optional)
    pub profile_url: Option<String>,
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl WebFingerLink {
    /// `application/activity+json`, or JSON-LD with the ActivityStreams profile
    fn is_activitypub(&self) -> bool {
        let Some(link_type) = self.link_type.as_deref() else {
            return false;
        };
        let mut parts = link_type.split(';').map(str::trim);
        match parts.next() {
            Some(media) if media.eq_ignore_ascii_case(ACTIVITY_JSON) => true,
            Some(media) if media.eq_ignore_ascii_case(LD_JSON) => parts.any(|param| {
                param
                    .split_once('=')
                    .is_some_and(|(name, value)| {
                        name.trim().eq_ignore_ascii_case("profile")
                            && value.trim().trim_matches('"') == ACTIVITYSTREAMS_PROFILE
                    })
            }),
            _ => false,
        }
    }
}

/// Split an account address into `(user, domain)`
///
/// Accepts `acct:user@domain`, `user@domain` and `@user@domain`.
pub fn parse_account(account: &str) -> Result<(String, String), FederationError> {
    let trimmed = account.trim();
    let address = trimmed
        .strip_prefix("acct:")
        .or_else(|| trimmed.strip_prefix('@'))
        .unwrap_or(trimmed);

    let invalid = || FederationError::Discovery(format!("Invalid account address: {}", account));

    let (user, domain) = address.split_once('@').ok_or_else(invalid)?;
    let well_formed = |part: &str| {
        !part.is_empty()
            && !part
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '@' | '/' | '?' | '#' | '&'))
    };
    if !well_formed(user) || !well_formed(domain) {
        return Err(invalid());
    }

    Ok((user.to_string(), domain.to_ascii_lowercase()))
}

/// Discovers remote actors through WebFinger
///
/// Results are not cached.
pub struct WebFingerResolver {
    transport: Arc<dyn HttpTransport>,
    scheme: String,
}

impl WebFingerResolver {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &FederationConfig) -> Self {
        Self {
            transport,
            scheme: config.webfinger_scheme.clone(),
        }
    }

    /// Resolve an address to ActivityPub actor
    ///
    /// # Errors
    /// - `ActorNotFound` if the server answers 404 or 410
    /// - `Discovery` for any other failure, including a JRD without an
    ///   ActivityPub `self` link
    ///
    /// # Example
    /// ```ignore
    /// let result = resolver.resolve("acct:alice@example.org").await?;
    /// println!("Actor: {}", result.actor_uri);
    /// ```
    pub async fn resolve(&self, account: &str) -> Result<WebFingerResult, FederationError> {
        let (user, domain) = parse_account(account)?;
        let resource = format!("acct:{}@{}", user, domain);
        let url = format!(
            "{}://{}/.well-known/webfinger?resource={}",
            self.scheme, domain, resource
        );

        let request = http::Request::get(url.as_str())
            .header(ACCEPT, JRD_ACCEPT)
            .body(Vec::new())
            .map_err(|e| FederationError::Discovery(format!("Invalid WebFinger URL: {}", e)))?;

        let response = self.transport.execute(request).await.map_err(|e| {
            FederationError::Discovery(format!("WebFinger request to {} failed: {}", domain, e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FederationError::ActorNotFound(resource));
        }
        if !status.is_success() {
            return Err(FederationError::Discovery(format!(
                "WebFinger for {} returned HTTP {}",
                resource, status
            )));
        }

        let jrd: WebFingerResponse = serde_json::from_slice(response.body()).map_err(|e| {
            FederationError::Discovery(format!("Malformed JRD for {}: {}", resource, e))
        })?;

        let actor_uri = jrd
            .links
            .iter()
            .find(|link| link.rel == "self" && link.is_activitypub())
            .and_then(|link| link.href.clone())
            .ok_or_else(|| {
                FederationError::Discovery(format!("No ActivityPub self link for {}", resource))
            })?;

        let profile_url = jrd
            .links
            .iter()
            .find(|link| link.rel == PROFILE_PAGE_REL)
            .and_then(|link| link.href.clone());

        tracing::debug!(%resource, %actor_uri, "Resolved WebFinger address");

        Ok(WebFingerResult {
            subject: jrd.subject,
            aliases: jrd.aliases.unwrap_or_default(),
            actor_uri,
            profile_url,
        })
    }
}

/// Generate WebFinger response for a local account.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
/// * `base_url` - Instance base URL (includes protocol)
pub fn generate_webfinger_response(username: &str, domain: &str, base_url: &str) -> WebFingerResponse {
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);

    WebFingerResponse {
        subject: format!("acct:{}@{}", username, domain),
        aliases: Some(vec![actor_url.clone()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some(ACTIVITY_JSON.to_string()),
                href: Some(actor_url.clone()),
                template: None,
            },
            WebFingerLink {
                rel: PROFILE_PAGE_REL.to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_url),
                template: None,
            },
        ],
    }
}
