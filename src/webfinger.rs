//! WebFinger discovery
//!
//! Maps an account identifier (`acct:user@domain`) to the canonical
//! ActivityPub actor URL by querying the domain's discovery endpoint.
//! Resolution is idempotent and performs no local mutation.

use crate::actor::{Actor, ActorCache};
use crate::error::{FederationError, Result};
use crate::fetch::{ACTIVITY_CONTENT_TYPE, ACTIVITY_LD_CONTENT_TYPE};
use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// WebFinger client
#[derive(Clone)]
pub struct WebFingerClient {
    http_client: reqwest::Client,
    /// Scheme for discovery URLs; "http" only for local test domains
    scheme: &'static str,
}

impl WebFingerClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            scheme: "https",
        }
    }

    /// Discovery over plain http, for mock remotes in tests
    pub fn new_insecure(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            scheme: "http",
        }
    }

    /// Resolve a remote handle to its canonical actor URL
    ///
    /// Queries `https://<domain>/.well-known/webfinger?resource=acct:...`
    /// and extracts the `self` link with an ActivityPub media type.
    ///
    /// # Returns
    /// - `Ok(Some(url))` when the domain knows the account
    /// - `Ok(None)` on a non-success status or a JRD without a matching
    ///   link: a well-formed "not found", not an error
    ///
    /// # Errors
    /// - `InvalidHandle` when the handle is local (no domain to query)
    /// - `HttpClient` on transport-level failure (DNS, connect, timeout)
    pub async fn resolve(&self, handle: &Handle) -> Result<Option<Url>> {
        let acct = handle.to_acct().ok_or_else(|| {
            FederationError::InvalidHandle(format!(
                "cannot resolve local handle {} without a domain",
                handle
            ))
        })?;
        let domain = handle.domain().unwrap_or_default();

        let query_url = format!(
            "{}://{}/.well-known/webfinger?resource=acct:{}",
            self.scheme,
            domain,
            urlencoding::encode(&acct)
        );

        tracing::debug!(handle = %handle, url = %query_url, "WebFinger query");

        let response = self
            .http_client
            .get(&query_url)
            .header("Accept", "application/jrd+json")
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(
                handle = %handle,
                status = response.status().as_u16(),
                "WebFinger lookup found no record"
            );
            return Ok(None);
        }

        let jrd: WebFingerResponse = response.json().await?;
        Ok(extract_self_link(&jrd))
    }

    /// Resolve a handle and fetch its actor through the cache
    ///
    /// # Errors
    /// `ActorNotFound` when the domain has no record for the handle;
    /// fetch errors propagate from the cache fill.
    pub async fn resolve_to_actor(&self, handle: &Handle, cache: &ActorCache) -> Result<Arc<Actor>> {
        let actor_url = self
            .resolve(handle)
            .await?
            .ok_or(FederationError::ActorNotFound)?;

        cache.get_and_cache(&actor_url).await
    }
}

/// Extract the canonical actor URL from a JRD link set
///
/// The matching entry has `rel == "self"` and an ActivityPub media type.
fn extract_self_link(jrd: &WebFingerResponse) -> Option<Url> {
    jrd.links
        .iter()
        .filter(|link| link.rel == "self")
        .filter(|link| {
            link.link_type
                .as_deref()
                .is_some_and(is_activitypub_media_type)
        })
        .find_map(|link| link.href.as_deref())
        .and_then(|href| Url::parse(href).ok())
}

fn is_activitypub_media_type(media_type: &str) -> bool {
    media_type == ACTIVITY_CONTENT_TYPE || media_type == ACTIVITY_LD_CONTENT_TYPE
}

/// Generate the JRD document for a local account
///
/// Serving it from `/.well-known/webfinger` is the router's job; only
/// the document shape lives here.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
/// * `base_url` - Instance base URL (includes protocol)
pub fn jrd_for_local_account(username: &str, domain: &str, base_url: &str) -> WebFingerResponse {
    let subject = format!("acct:{}@{}", username, domain);
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);

    WebFingerResponse {
        subject,
        aliases: Some(vec![actor_url.clone()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some(ACTIVITY_CONTENT_TYPE.to_string()),
                href: Some(actor_url.clone()),
                template: None,
            },
            WebFingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_url),
                template: None,
            },
        ],
    }
}
