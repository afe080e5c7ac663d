//! HTTP Signature codec
//!
//! Pure helpers shared by the signer and the verifier: the signature base
//! string, the `Signature` header format, the body digest and HTTP dates.
//! Both sides build the base through [`build_signature_base`], so the bytes
//! that get signed and the bytes that get verified cannot drift apart.
//!
//! Format follows draft-cavage-http-signatures as deployed by Mastodon:
//! https://docs.joinmastodon.org/spec/security/

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::error::FederationError;

/// Pseudo header covering method and path
pub const REQUEST_TARGET: &str = "(request-target)";

/// Algorithm name written on outbound signatures
pub const SIGNATURE_ALGORITHM: &str = "rsa-sha256";

/// Algorithm label some servers use for the same RSA-SHA256 construction
pub const HS2019: &str = "hs2019";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

fn malformed(message: impl Into<String>) -> FederationError {
    FederationError::MalformedSignature(message.into())
}

/// Format a timestamp as an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`)
pub fn format_http_date(instant: DateTime<Utc>) -> String {
    instant.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP-date header value
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Value of a single signed component, with repeated headers joined
fn component_value(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    name: &str,
) -> Result<String, FederationError> {
    if name == REQUEST_TARGET {
        return Ok(format!("{} {}", method.to_ascii_lowercase(), path));
    }

    if name.starts_with('(') {
        return Err(malformed(format!("Unsupported pseudo header: {}", name)));
    }

    let mut values = Vec::new();
    for value in headers.get_all(name) {
        let value = value
            .to_str()
            .map_err(|_| malformed(format!("Non-ASCII value in {} header", name)))?;
        values.push(value.trim());
    }

    if values.is_empty() {
        return Err(malformed(format!("Missing {} header", name)));
    }

    Ok(values.join(", "))
}

fn component_lines(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    ordered_names: &[impl AsRef<str>],
) -> Result<Vec<(String, String)>, FederationError> {
    if ordered_names.is_empty() {
        return Err(malformed("Empty signed header list"));
    }

    ordered_names
        .iter()
        .map(|name| {
            let name = name.as_ref().trim().to_ascii_lowercase();
            let value = component_value(method, path, headers, &name)?;
            Ok((name, value))
        })
        .collect()
}

fn join_lines(lines: &[(String, String)]) -> String {
    lines
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the signature base string
///
/// One `name: value` line per entry of `ordered_names`, in that order,
/// joined by `\n` with no trailing newline. `(request-target)` renders as
/// `<lowercase method> <path>`.
///
/// # Errors
/// `MalformedSignature` if a named header is absent or not ASCII.
pub fn build_signature_base(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    ordered_names: &[impl AsRef<str>],
) -> Result<String, FederationError> {
    let lines = component_lines(method, path, headers, ordered_names)?;
    Ok(join_lines(&lines))
}

/// The ordered header components selected for one signature
///
/// Built once per request and turned into the base string exactly once.
#[derive(Debug)]
pub struct SignatureComponents {
    lines: Vec<(String, String)>,
    algorithm: String,
    key_id: String,
    created: DateTime<Utc>,
}

impl SignatureComponents {
    pub fn collect(
        method: &str,
        path: &str,
        headers: &HeaderMap,
        ordered_names: &[impl AsRef<str>],
        key_id: &str,
        created: DateTime<Utc>,
    ) -> Result<Self, FederationError> {
        Ok(Self {
            lines: component_lines(method, path, headers, ordered_names)?,
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            key_id: key_id.to_string(),
            created,
        })
    }

    pub fn header_names(&self) -> Vec<String> {
        self.lines.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn into_signature_base(self) -> String {
        join_lines(&self.lines)
    }
}

/// Parsed `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names, lowercased, in signing order
    pub headers: Vec<String>,
    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl SignatureParams {
    /// Serialize back into a `Signature` header value
    pub fn to_header_value(&self) -> String {
        format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            self.algorithm,
            self.headers.join(" "),
            BASE64.encode(&self.signature)
        )
    }
}

/// Split `k1="v1",k2=v2` into pairs; quoted values may contain commas.
fn split_params(input: &str) -> Result<Vec<(String, String)>, FederationError> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let (key, after) = rest
            .split_once('=')
            .ok_or_else(|| malformed("Expected key=value pair"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed("Empty parameter name"));
        }

        let after = after.trim_start();
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| malformed(format!("Unterminated value for {}", key)))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after.find(',') {
                Some(idx) => (after[..idx].trim(), &after[idx..]),
                None => (after.trim(), ""),
            }
        };

        params.push((key.to_string(), value.to_string()));

        rest = remainder.trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(malformed("Expected ',' between parameters"));
        }
    }

    Ok(params)
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// `headers` defaults to `date` and `algorithm` to `hs2019` when absent,
/// as the draft prescribes. Unknown parameters are ignored.
pub fn parse_signature_header(header: &str) -> Result<SignatureParams, FederationError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for (key, value) in split_params(header)? {
        match key.as_str() {
            "keyId" => key_id = Some(value),
            "algorithm" => algorithm = Some(value.to_ascii_lowercase()),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect::<Vec<_>>(),
                )
            }
            "signature" => signature = Some(value),
            _ => {}
        }
    }

    let key_id = key_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("Missing keyId"))?;
    let signature = signature
        .filter(|sig| !sig.is_empty())
        .ok_or_else(|| malformed("Missing signature"))?;
    let signature = BASE64
        .decode(signature.as_bytes())
        .map_err(|_| malformed("Invalid signature encoding"))?;
    let headers = match headers {
        Some(list) if list.is_empty() => return Err(malformed("Empty headers list")),
        Some(list) => list,
        None => vec!["date".to_string()],
    };

    Ok(SignatureParams {
        key_id,
        algorithm: algorithm.unwrap_or_else(|| HS2019.to_string()),
        headers,
        signature,
    })
}

/// Locate the signature parameters on a request
///
/// Accepts a `Signature` header or `Authorization: Signature <params>`.
pub fn signature_header_value(headers: &HeaderMap) -> Result<&str, FederationError> {
    if let Some(value) = headers.get("signature") {
        return value
            .to_str()
            .map_err(|_| malformed("Invalid Signature header"));
    }

    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Signature "))
        .ok_or_else(|| malformed("Missing Signature header"))
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Check a received `Digest` header against the body
///
/// The header may list several algorithms; only the SHA-256 entry counts.
pub fn digest_matches(header_value: &str, body: &[u8]) -> bool {
    let expected = BASE64.encode(Sha256::digest(body));

    header_value.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(algo, value)| algo.eq_ignore_ascii_case("SHA-256") && value == expected)
    })
}
