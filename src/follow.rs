//! Follow relationship flows
//!
//! Composes handle parsing, WebFinger discovery, the actor cache, and
//! signed delivery into the two outbound relationship operations:
//! follow and unfollow. The local edge store is a collaborator seam;
//! the embedding server persists edges however it likes.

use crate::activity::Activity;
use crate::actor::{Actor, ActorCache};
use crate::error::Result;
use crate::handle::Handle;
use crate::keys::SigningKey;
use crate::retry::RetryingDeliverer;
use crate::webfinger::WebFingerClient;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Collaborator seam: persisted follow edges for local actors
pub trait FollowStore: Send + Sync {
    /// Record that `actor` follows `target`
    fn add_following(&self, actor: &Url, target: &Url) -> impl Future<Output = Result<()>> + Send;

    /// Remove the edge from `actor` to `target`
    fn remove_following(&self, actor: &Url, target: &Url)
    -> impl Future<Output = Result<()>> + Send;

    /// Whether `actor` currently follows `target`
    fn is_following(&self, actor: &Url, target: &Url) -> impl Future<Output = Result<bool>> + Send;

    /// All actor ids that `actor` follows
    fn following_ids(&self, actor: &Url) -> impl Future<Output = Result<Vec<Url>>> + Send;
}

/// In-memory follow store for tests and hosts without persistence
#[derive(Default)]
pub struct MemoryFollowStore {
    edges: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryFollowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FollowStore for MemoryFollowStore {
    async fn add_following(&self, actor: &Url, target: &Url) -> Result<()> {
        let mut edges = self.edges.write().await;
        edges
            .entry(actor.to_string())
            .or_default()
            .insert(target.to_string());
        Ok(())
    }

    async fn remove_following(&self, actor: &Url, target: &Url) -> Result<()> {
        let mut edges = self.edges.write().await;
        if let Some(targets) = edges.get_mut(actor.as_str()) {
            targets.remove(target.as_str());
        }
        Ok(())
    }

    async fn is_following(&self, actor: &Url, target: &Url) -> Result<bool> {
        let edges = self.edges.read().await;
        Ok(edges
            .get(actor.as_str())
            .is_some_and(|targets| targets.contains(target.as_str())))
    }

    async fn following_ids(&self, actor: &Url) -> Result<Vec<Url>> {
        let edges = self.edges.read().await;
        let ids = edges
            .get(actor.as_str())
            .into_iter()
            .flatten()
            .filter_map(|id| Url::parse(id).ok())
            .collect();
        Ok(ids)
    }
}

/// Outbound follow and unfollow flows
pub struct FollowService {
    webfinger: WebFingerClient,
    cache: Arc<ActorCache>,
    deliverer: RetryingDeliverer,
}

impl FollowService {
    pub fn new(
        webfinger: WebFingerClient,
        cache: Arc<ActorCache>,
        deliverer: RetryingDeliverer,
    ) -> Self {
        Self {
            webfinger,
            cache,
            deliverer,
        }
    }

    /// Follow a remote account
    ///
    /// Resolves the handle, delivers a signed Follow to the target's
    /// inbox, and records the local edge only after delivery succeeds.
    ///
    /// # Returns
    /// The resolved target actor.
    ///
    /// # Errors
    /// - `ActorNotFound` when the handle does not resolve
    /// - `Delivery` when every delivery attempt fails; no edge is
    ///   recorded in that case
    pub async fn follow<S: FollowStore>(
        &self,
        store: &S,
        signing_key: &SigningKey,
        local_actor: &Url,
        target: &Handle,
    ) -> Result<Arc<Actor>> {
        let target_actor = self.webfinger.resolve_to_actor(target, &self.cache).await?;

        let activity = Activity::follow(local_actor, &target_actor.id);
        self.deliverer
            .deliver_to_actor(signing_key, &activity, &target_actor)
            .await?;

        store.add_following(local_actor, &target_actor.id).await?;

        tracing::info!(actor = %local_actor, target = %target_actor.id, "Followed remote account");
        Ok(target_actor)
    }

    /// Unfollow a remote account
    ///
    /// Delivers a signed Undo of the Follow. The local edge is removed
    /// only after delivery succeeds, so a failed unfollow leaves the
    /// relationship observable and retryable rather than silently
    /// half-removed.
    pub async fn unfollow<S: FollowStore>(
        &self,
        store: &S,
        signing_key: &SigningKey,
        local_actor: &Url,
        target: &Handle,
    ) -> Result<()> {
        let target_actor = self.webfinger.resolve_to_actor(target, &self.cache).await?;

        let activity = Activity::undo_follow(local_actor, &target_actor.id);
        self.deliverer
            .deliver_to_actor(signing_key, &activity, &target_actor)
            .await?;

        store
            .remove_following(local_actor, &target_actor.id)
            .await?;

        tracing::info!(actor = %local_actor, target = %target_actor.id, "Unfollowed remote account");
        Ok(())
    }
}
