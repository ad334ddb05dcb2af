//! Content-negotiated fetching of remote federation documents
//!
//! One `RemoteFetcher` owns the shared HTTP client and performs every
//! outbound GET in the crate. Mandatory fetches fail hard on a non-2xx
//! status; optional page fetches report the outcome as a value so the
//! caller can degrade to partial results.

use crate::error::{FederationError, Result};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use url::Url;

/// ActivityPub content type sent as `Accept` on fetches and
/// `Content-Type` on deliveries
pub const ACTIVITY_CONTENT_TYPE: &str = "application/activity+json";

/// JSON-LD variant some servers advertise in WebFinger links
pub const ACTIVITY_LD_CONTENT_TYPE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Outcome of an optional page fetch
///
/// A non-success status on a continuation page must not abort an
/// otherwise-successful partial read, so the outcome is a value rather
/// than an error. Whether and how to log is the caller's decision.
#[derive(Debug)]
pub enum PageFetch<P> {
    /// Remote returned a well-formed page
    Page(P),
    /// Remote answered with a non-success status; treated as end-of-stream
    Missing { status: u16 },
    /// Request could not complete (forbidden target, transport, bad body)
    Failed(FederationError),
}

/// Remote document fetcher
///
/// Cheap to clone; all clones share the underlying connection pool.
#[derive(Clone)]
pub struct RemoteFetcher {
    http_client: reqwest::Client,
    allow_private_destinations: bool,
}

impl RemoteFetcher {
    pub fn new(http_client: reqwest::Client, allow_private_destinations: bool) -> Self {
        Self {
            http_client,
            allow_private_destinations,
        }
    }

    /// Fetch a mandatory remote document
    ///
    /// Issues `GET <url>` with `Accept: application/activity+json` and
    /// deserializes the JSON body.
    ///
    /// # Errors
    /// - `ForbiddenTarget` when the URL points at a disallowed host
    /// - `RemoteFetch { url, status }` on a non-success status
    /// - `HttpClient` on transport failure or an undecodable body
    pub async fn fetch_object<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        self.ensure_allowed_target(url)?;

        let response = self
            .http_client
            .get(url.clone())
            .header("Accept", ACTIVITY_CONTENT_TYPE)
            .send()
            .await?;

        let status = response.status();
        crate::metrics::REMOTE_FETCHES_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();

        if !status.is_success() {
            return Err(FederationError::RemoteFetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// Fetch an optional continuation page
    ///
    /// Same request shape as `fetch_object`, but every failure mode is
    /// reported as a `PageFetch` value instead of an error.
    pub async fn fetch_page_value<T: DeserializeOwned>(&self, url: &Url) -> PageFetch<T> {
        if let Err(err) = self.ensure_allowed_target(url) {
            return PageFetch::Failed(err);
        }

        let response = match self
            .http_client
            .get(url.clone())
            .header("Accept", ACTIVITY_CONTENT_TYPE)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return PageFetch::Failed(err.into()),
        };

        let status = response.status();
        crate::metrics::REMOTE_FETCHES_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();

        if !status.is_success() {
            return PageFetch::Missing {
                status: status.as_u16(),
            };
        }

        match response.json::<T>().await {
            Ok(page) => PageFetch::Page(page),
            Err(err) => PageFetch::Failed(err.into()),
        }
    }

    fn ensure_allowed_target(&self, url: &Url) -> Result<()> {
        ensure_allowed_url(url, self.allow_private_destinations)
    }
}

/// Reject URLs whose host is an obvious local or private destination
///
/// Applied before any fetch or delivery request is made. Hosts that
/// look public but resolve internally are the transport's problem; this
/// guard stops the cheap cases early.
pub(crate) fn ensure_allowed_url(url: &Url, allow_private_destinations: bool) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FederationError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| FederationError::Validation(format!("Missing host in URL: {}", url)))?;

    if !allow_private_destinations && is_disallowed_host(host) {
        return Err(FederationError::ForbiddenTarget(host.to_string()));
    }

    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(allow_private: bool) -> RemoteFetcher {
        RemoteFetcher::new(reqwest::Client::new(), allow_private)
    }

    #[test]
    fn guard_rejects_localhost() {
        let url = Url::parse("https://localhost/users/alice").expect("valid url");
        assert!(matches!(
            fetcher(false).ensure_allowed_target(&url),
            Err(FederationError::ForbiddenTarget(_))
        ));
    }

    #[test]
    fn guard_rejects_private_ip() {
        let url = Url::parse("http://192.168.1.10/inbox").expect("valid url");
        assert!(matches!(
            fetcher(false).ensure_allowed_target(&url),
            Err(FederationError::ForbiddenTarget(_))
        ));
    }

    #[test]
    fn guard_rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.com/object").expect("valid url");
        assert!(matches!(
            fetcher(false).ensure_allowed_target(&url),
            Err(FederationError::Validation(_))
        ));
    }

    #[test]
    fn guard_accepts_public_host() {
        let url = Url::parse("https://example.com/users/alice").expect("valid url");
        assert!(fetcher(false).ensure_allowed_target(&url).is_ok());
    }

    #[test]
    fn guard_allows_private_destinations_when_configured() {
        let url = Url::parse("http://127.0.0.1:8080/inbox").expect("valid url");
        assert!(fetcher(true).ensure_allowed_target(&url).is_ok());
    }
}
