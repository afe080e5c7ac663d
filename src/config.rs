//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (FITPUB__*, override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Smallest RSA modulus accepted for actor keys
pub const MIN_KEY_BITS: usize = 2048;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "fit.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://fit.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation protocol configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// User-Agent sent on every outbound request
    pub user_agent: String,
    /// TCP/TLS connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Largest response body read from a remote server
    pub max_response_bytes: usize,
    /// Allow outbound requests to loopback/private addresses (tests, LAN setups)
    pub allow_private_networks: bool,
    /// Scheme used for WebFinger discovery ("https" outside development)
    pub webfinger_scheme: String,
    /// How long a fetched remote key is trusted without refetching
    pub key_cache_ttl_secs: u64,
    /// Pause before the single retry of a failed key fetch
    pub key_fetch_retry_delay_ms: u64,
    /// Maximum age of a signed request's Date header
    pub max_signature_age_secs: u64,
    /// Maximum distance of a Date header into the future
    pub max_future_skew_secs: u64,
    /// Header names every inbound signature must cover
    #[serde(default = "default_required_signed_headers")]
    pub required_signed_headers: Vec<String>,
    /// RSA modulus size for newly provisioned actor keys
    pub key_bits: usize,
    /// Local actors whose key pairs are ensured at start-up
    #[serde(default)]
    pub local_actors: Vec<String>,
}

impl FederationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_required_signed_headers() -> Vec<String> {
    ["(request-target)", "host", "date"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Outbound delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers
    pub workers: usize,
    /// Idle poll interval of a worker in milliseconds
    pub poll_interval_ms: u64,
    /// Delay before the first retry in seconds
    pub base_delay_secs: u64,
    /// Upper bound for a single retry delay in seconds
    pub max_delay_secs: u64,
    /// Failed attempts tolerated before dead-lettering
    pub max_attempts: u32,
    /// Relative jitter applied to retry delays (0.2 = ±20%)
    pub jitter: f64,
    /// How long terminal tasks are kept for inspection
    pub retention_days: u64,
    /// Interval of the retention cleanup loop in seconds
    pub cleanup_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FITPUB__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("server.domain", "localhost")?
            .set_default("database.path", "data/fitpub.db")?
            .set_default("federation.user_agent", concat!("FitPub/", env!("CARGO_PKG_VERSION")))?
            .set_default("federation.connect_timeout_secs", 5)?
            .set_default("federation.request_timeout_secs", 10)?
            .set_default("federation.max_response_bytes", 1024 * 1024)?
            .set_default("federation.allow_private_networks", false)?
            .set_default("federation.webfinger_scheme", "https")?
            .set_default("federation.key_cache_ttl_secs", 3600)?
            .set_default("federation.key_fetch_retry_delay_ms", 250)?
            .set_default("federation.max_signature_age_secs", 30)?
            .set_default("federation.max_future_skew_secs", 300)?
            .set_default("federation.key_bits", 2048)?
            .set_default("delivery.workers", 4)?
            .set_default("delivery.poll_interval_ms", 1000)?
            .set_default("delivery.base_delay_secs", 30)?
            .set_default("delivery.max_delay_secs", 6 * 3600)?
            .set_default("delivery.max_attempts", 10)?
            .set_default("delivery.jitter", 0.2)?
            .set_default("delivery.retention_days", 7)?
            .set_default("delivery.cleanup_interval_secs", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FITPUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(AppError::Config(format!(
                "federation.key_bits must be at least {}",
                MIN_KEY_BITS
            )));
        }

        for required in ["(request-target)", "date"] {
            if !self
                .federation
                .required_signed_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(required))
            {
                return Err(AppError::Config(format!(
                    "federation.required_signed_headers must include {}",
                    required
                )));
            }
        }

        if self.delivery.workers == 0 {
            return Err(AppError::Config(
                "delivery.workers must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.delivery.jitter) {
            return Err(AppError::Config(
                "delivery.jitter must be in [0, 1)".to_string(),
            ));
        }

        if self.delivery.base_delay_secs == 0
            || self.delivery.base_delay_secs > self.delivery.max_delay_secs
        {
            return Err(AppError::Config(
                "delivery.base_delay_secs must be positive and not exceed delivery.max_delay_secs"
                    .to_string(),
            ));
        }

        if is_local_server_domain(&self.server.domain) {
            tracing::warn!(
                domain = %self.server.domain,
                protocol = %self.server.protocol,
                "Running with a local server domain; remote instances cannot reach this server"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/fitpub-test.db"),
            },
            federation: FederationConfig {
                user_agent: "FitPub/test".to_string(),
                connect_timeout_secs: 5,
                request_timeout_secs: 10,
                max_response_bytes: 1024 * 1024,
                allow_private_networks: true,
                webfinger_scheme: "http".to_string(),
                key_cache_ttl_secs: 3600,
                key_fetch_retry_delay_ms: 0,
                max_signature_age_secs: 30,
                max_future_skew_secs: 300,
                required_signed_headers: default_required_signed_headers(),
                key_bits: 2048,
                local_actors: vec!["alice".to_string()],
            },
            delivery: DeliveryConfig {
                workers: 2,
                poll_interval_ms: 50,
                base_delay_secs: 30,
                max_delay_secs: 3600,
                max_attempts: 5,
                jitter: 0.2,
                retention_days: 7,
                cleanup_interval_secs: 3600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_small_key_bits() {
        let mut config = valid_config();
        config.federation.key_bits = 1024;

        let error = config.validate().expect_err("1024-bit keys must be rejected");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("federation.key_bits")
        ));
    }

    #[test]
    fn validate_rejects_signed_header_set_without_date() {
        let mut config = valid_config();
        config.federation.required_signed_headers =
            vec!["(request-target)".to_string(), "host".to_string()];

        let error = config
            .validate()
            .expect_err("date must always be a required signed header");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("date")
        ));
    }

    #[test]
    fn validate_rejects_base_delay_above_max() {
        let mut config = valid_config();
        config.delivery.base_delay_secs = 7200;

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "fit.example.com".to_string();
        config.server.protocol = "http".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }
}
