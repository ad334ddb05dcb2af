//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

/// Main federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    pub instance: InstanceConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

/// Local instance identity
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl InstanceConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// User-Agent for all outbound federation requests
    pub user_agent: String,
    /// Request timeout in seconds, applied at the transport boundary
    pub timeout_seconds: u64,
    /// Permit fetches/deliveries to loopback and private-range hosts.
    ///
    /// Off in production; the integration suite and local development
    /// need it to talk to mock servers on 127.0.0.1.
    #[serde(default)]
    pub allow_private_destinations: bool,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Actor cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Actor cache TTL in seconds (default: 3600)
    pub actor_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn actor_ttl(&self) -> Duration {
        Duration::from_secs(self.actor_ttl_seconds)
    }
}

/// Collection pagination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    /// Hard cap on pages walked per collection, independent of any item
    /// limit. Guards against remotes that loop their `next` cursors.
    pub max_pages: usize,
}

/// Activity delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum concurrent inbox deliveries during fan-out
    pub max_concurrent: usize,
    /// Retry policy for the retrying deliverer wrapper
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Bounded exponential backoff settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling for the backoff delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl FederationConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDKIT_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::FederationError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("instance.protocol", "https")?
            .set_default("http.user_agent", format!("Fedkit/{}", env!("CARGO_PKG_VERSION")))?
            .set_default("http.timeout_seconds", 30)?
            .set_default("http.allow_private_destinations", false)?
            .set_default("cache.actor_ttl_seconds", 3600)?
            .set_default("pagination.max_pages", 100)?
            .set_default("delivery.max_concurrent", 10)?
            .set_default("delivery.retry.max_attempts", 3)?
            .set_default("delivery.retry.base_delay_ms", 500)?
            .set_default("delivery.retry.max_delay_ms", 30000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDKIT_*)
            .add_source(
                Environment::with_prefix("FEDKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::FederationError::Config(e.to_string()))?;

        let federation_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::FederationError::Config(e.to_string()))?;
        federation_config.validate()?;
        Ok(federation_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::FederationError> {
        if self.instance.domain.trim().is_empty() {
            return Err(crate::error::FederationError::Config(
                "instance.domain must not be empty".to_string(),
            ));
        }

        match self.instance.protocol.as_str() {
            "https" => {}
            "http" => {
                if !is_local_instance_domain(&self.instance.domain) {
                    return Err(crate::error::FederationError::Config(
                        "instance.protocol must be https for non-local instance domains"
                            .to_string(),
                    ));
                }
                tracing::warn!(
                    domain = %self.instance.domain,
                    "Using http protocol for local development"
                );
            }
            other => {
                return Err(crate::error::FederationError::Config(format!(
                    "instance.protocol must be http or https, got {}",
                    other
                )));
            }
        }

        if self.pagination.max_pages == 0 {
            return Err(crate::error::FederationError::Config(
                "pagination.max_pages must be greater than 0".to_string(),
            ));
        }

        if self.delivery.max_concurrent == 0 {
            return Err(crate::error::FederationError::Config(
                "delivery.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.delivery.retry.max_attempts == 0 {
            return Err(crate::error::FederationError::Config(
                "delivery.retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_instance_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_instance_domain(domain: &str) -> bool {
    let host = normalized_instance_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
