//! Outbound HTTP transport
//!
//! Every federation request (signed deliveries, key fetches, WebFinger)
//! goes through [`HttpTransport`]. The production implementation never
//! follows redirects: a redirect would let a remote host point key
//! resolution or a signed `Host` at a server of its choosing.

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::FederationConfig;
use crate::error::AppError;

/// Transport-level failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("destination not allowed: {0}")]
    Blocked(String),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the same request may succeed if tried again later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Connection(_) | TransportError::Other(_)
        )
    }
}

/// HTTP client used by the federation core
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and read the full (bounded) response body
    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError>;
}

/// `reqwest`-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_response_bytes: usize,
    allow_private_networks: bool,
}

impl ReqwestTransport {
    /// Build the federation client: no redirects, bounded timeouts
    pub fn new(config: &FederationConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
            allow_private_networks: config.allow_private_networks,
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connection(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        if !self.allow_private_networks {
            guard_destination(request.uri()).await?;
        }

        let request = reqwest::Request::try_from(request)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let mut response = self
            .client
            .execute(request)
            .await
            .map_err(map_reqwest_error)?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_response_bytes as u64)
        {
            return Err(TransportError::BodyTooLarge(self.max_response_bytes));
        }

        let status = response.status();
        let headers = response.headers().clone();

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(TransportError::BodyTooLarge(self.max_response_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        let mut out = http::Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Reject non-HTTP(S) targets and hosts that are, or resolve to, local or
/// private addresses.
async fn guard_destination(uri: &http::Uri) -> Result<(), TransportError> {
    let default_port = match uri.scheme_str() {
        Some("https") => 443,
        Some("http") => 80,
        other => {
            return Err(TransportError::Blocked(format!(
                "unsupported scheme: {}",
                other.unwrap_or("none")
            )));
        }
    };

    let host = uri
        .host()
        .ok_or_else(|| TransportError::InvalidRequest("missing host".to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']');

    if is_disallowed_host(host) {
        return Err(TransportError::Blocked(host.to_string()));
    }

    let port = uri.port_u16().unwrap_or(default_port);
    let lookup = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::Connection(format!("failed to resolve {}: {}", host, e)))?;

    let mut resolved_any = false;
    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(TransportError::Blocked(format!(
                "{} resolves to {}",
                host,
                addr.ip()
            )));
        }
    }

    if !resolved_any {
        return Err(TransportError::Connection(format!(
            "no DNS records for {}",
            host
        )));
    }

    Ok(())
}
