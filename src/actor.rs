//! Federated actor documents and the actor cache
//!
//! Actors fetched from remote servers are cached by canonical id URL.
//! Entries are immutable snapshots: a re-fetch replaces the entry, it
//! never mutates one in place. Concurrent requests for the same uncached
//! URL collapse into a single underlying fetch.

use crate::error::Result;
use crate::fetch::RemoteFetcher;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, RwLock};
use url::Url;

/// Federated identity record
///
/// Serde shape follows the ActivityPub actor document; unknown fields
/// are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Canonical actor id URL; the cache key
    pub id: Url,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Endpoint receiving incoming federation messages
    pub inbox: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<ActorPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ActorEndpoints>,
}

/// Public key reference advertised by an actor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorPublicKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Url>,
    pub public_key_pem: String,
}

/// Optional actor endpoints block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorEndpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<Url>,
}

impl Actor {
    /// Shared inbox when advertised, otherwise the personal inbox
    pub fn shared_inbox_or_inbox(&self) -> &Url {
        self.endpoints
            .as_ref()
            .and_then(|endpoints| endpoints.shared_inbox.as_ref())
            .unwrap_or(&self.inbox)
    }
}

#[cfg(test)]
impl Actor {
    /// Minimal actor for unit tests
    pub(crate) fn stub_for_tests(id: &str) -> Self {
        let id = Url::parse(id).expect("valid test actor id");
        let inbox = id.join("inbox").expect("valid test inbox");
        Self {
            id,
            kind: Some("Person".to_string()),
            preferred_username: None,
            inbox,
            outbox: None,
            followers: None,
            following: None,
            public_key: None,
            endpoints: None,
        }
    }
}

/// Cached actor snapshot
#[derive(Clone)]
struct CachedActor {
    actor: Arc<Actor>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedActor {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Actor cache with per-key single-flight fetching
///
/// An explicit, owned cache with a defined lifecycle: construct it with
/// a TTL, pass it to the components that need it, drop it to tear it
/// down. Nothing in the crate reaches for it ambiently.
pub struct ActorCache {
    /// Canonical id URL -> cached snapshot
    entries: RwLock<HashMap<String, CachedActor>>,
    /// In-flight fetches, keyed like `entries`
    inflight: Mutex<HashMap<String, Arc<OnceCell<Arc<Actor>>>>>,
    fetcher: RemoteFetcher,
    default_ttl: Duration,
}

impl ActorCache {
    /// Create a new actor cache
    ///
    /// # Arguments
    /// * `fetcher` - Remote fetcher used on cache misses
    /// * `default_ttl` - TTL for cached actors (default: 1 hour)
    pub fn new(fetcher: RemoteFetcher, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            fetcher,
            default_ttl: default_ttl.unwrap_or(Duration::from_secs(3600)),
        }
    }

    /// Get the actor for a canonical id URL, fetching on miss
    ///
    /// Checks the cache first; on miss or expiry, fetches the document
    /// and stores it. Concurrent callers for the same uncached URL share
    /// one underlying fetch and observe the same snapshot.
    ///
    /// # Errors
    /// Propagates the mandatory-fetch failure (`RemoteFetch`, transport)
    /// when no valid cache entry exists and the fetch fails.
    pub async fn get_and_cache(&self, url: &Url) -> Result<Arc<Actor>> {
        let key = url.to_string();

        // 1. Check cache (read lock)
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(&key) {
                if cached.is_valid() {
                    tracing::debug!(url = %key, "Actor cache hit");
                    crate::metrics::CACHE_HITS_TOTAL
                        .with_label_values(&["actor"])
                        .inc();
                    return Ok(cached.actor.clone());
                }
                tracing::debug!(url = %key, "Actor cache entry expired");
            }
        }

        crate::metrics::CACHE_MISSES_TOTAL
            .with_label_values(&["actor"])
            .inc();

        // 2. Join or start the single in-flight fetch for this key
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                tracing::debug!(url = %key, "Actor cache miss, fetching");
                let actor: Actor = self.fetcher.fetch_object(url).await?;
                let snapshot = Arc::new(actor);
                self.store(&key, snapshot.clone()).await;
                Ok::<_, crate::error::FederationError>(snapshot)
            })
            .await
            .cloned();

        // 3. Retire the flight so a later expiry triggers a fresh fetch
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key);
        }

        result
    }

    /// Re-fetch an actor and replace the cached snapshot
    pub async fn refresh(&self, url: &Url) -> Result<Arc<Actor>> {
        let actor: Actor = self.fetcher.fetch_object(url).await?;
        let snapshot = Arc::new(actor);
        self.store(&url.to_string(), snapshot.clone()).await;
        Ok(snapshot)
    }

    async fn store(&self, key: &str, actor: Arc<Actor>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CachedActor {
                actor,
                cached_at: Instant::now(),
                ttl: self.default_ttl,
            },
        );
        crate::metrics::CACHE_SIZE
            .with_label_values(&["actor"])
            .set(entries.len() as i64);
    }

    /// Drop a cached actor
    pub async fn invalidate(&self, url: &Url) {
        let mut entries = self.entries.write().await;
        entries.remove(&url.to_string());
        tracing::debug!(url = %url, "Invalidated actor cache entry");
    }

    /// Drop all cached actors
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        tracing::debug!("Cleared actor cache");
    }

    /// Remove expired entries
    ///
    /// Should be called periodically by the cache owner.
    pub async fn prune_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, cached| cached.is_valid());
        let removed = before - entries.len();

        if removed > 0 {
            tracing::info!(removed, "Pruned expired actor cache entries");
        }
    }

    /// Cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total = entries.len();
        let valid = entries.values().filter(|cached| cached.is_valid()).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}
