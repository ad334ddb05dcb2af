//! Fedkit - federation primitives for ActivityPub servers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Flows (follow, fan-out)                  │
//! │  - follow / unfollow composition                            │
//! │  - retrying delivery with dead-letter sink                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Protocol Layer                          │
//! │  - WebFinger discovery                                      │
//! │  - collection pagination                                    │
//! │  - HTTP signatures, activity construction                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Transport Layer                         │
//! │  - content-negotiated fetching (reqwest)                    │
//! │  - actor cache with single-flight fills                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `handle`: account identifier parsing and normalization
//! - `fetch` / `actor`: remote document fetching and the actor cache
//! - `webfinger`: account discovery
//! - `collection`: ordered collections and cursor pagination
//! - `signature` / `activity` / `delivery` / `retry`: signed delivery
//! - `follow`: follow relationship flows
//! - `keys`: signing-key material and the key store seam
//! - `config`: configuration management
//! - `error`: error types

pub mod activity;
pub mod actor;
pub mod collection;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fetch;
pub mod follow;
pub mod handle;
pub mod keys;
pub mod metrics;
pub mod retry;
pub mod signature;
pub mod webfinger;

use std::sync::Arc;

/// Federation state shared across the embedding server
///
/// Owns the outbound HTTP client and the components built on top of it.
/// Cloned per use site; all clones share the connection pool and the
/// actor cache.
#[derive(Clone)]
pub struct Federation {
    /// Federation configuration
    pub config: Arc<config::FederationConfig>,

    /// Shared outbound HTTP client
    pub http_client: reqwest::Client,

    /// Remote document fetcher
    pub fetcher: fetch::RemoteFetcher,

    /// Actor cache with single-flight fills
    pub actor_cache: Arc<actor::ActorCache>,

    /// WebFinger discovery client
    pub webfinger: webfinger::WebFingerClient,

    /// Collection walker with the configured page cap
    pub walker: collection::CollectionWalker,

    /// Single-attempt activity deliverer
    pub deliverer: delivery::Deliverer,
}

impl Federation {
    /// Initialize federation state from configuration
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: config::FederationConfig) -> error::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.http.user_agent)
            .timeout(config.http.timeout())
            .build()
            .map_err(|e| error::FederationError::Internal(e.into()))?;

        let fetcher = fetch::RemoteFetcher::new(
            http_client.clone(),
            config.http.allow_private_destinations,
        );
        let actor_cache = Arc::new(actor::ActorCache::new(
            fetcher.clone(),
            Some(config.cache.actor_ttl()),
        ));

        let webfinger = if config.instance.protocol == "http" {
            webfinger::WebFingerClient::new_insecure(http_client.clone())
        } else {
            webfinger::WebFingerClient::new(http_client.clone())
        };

        let walker = collection::CollectionWalker::new(config.pagination.max_pages);
        let deliverer = delivery::Deliverer::new(
            http_client.clone(),
            config.http.allow_private_destinations,
            config.delivery.max_concurrent,
        );

        tracing::info!(
            domain = %config.instance.domain,
            base_url = %config.instance.base_url(),
            "Federation state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            http_client,
            fetcher,
            actor_cache,
            webfinger,
            walker,
            deliverer,
        })
    }

    /// Deliverer with the configured retry policy applied
    pub fn retrying_deliverer(&self) -> retry::RetryingDeliverer {
        let policy = retry::RetryPolicy::from_config(&self.config.delivery.retry);
        retry::RetryingDeliverer::new(self.deliverer.clone(), policy)
    }

    /// Follow flow service wired to this state's components
    pub fn follow_service(&self) -> follow::FollowService {
        follow::FollowService::new(
            self.webfinger.clone(),
            self.actor_cache.clone(),
            self.retrying_deliverer(),
        )
    }
}

/// Initialize tracing from logging configuration
///
/// Respects `RUST_LOG` when set; otherwise uses the configured level.
pub fn init_tracing(config: &config::LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fedkit={}", config.level).into());

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
