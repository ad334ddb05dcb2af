//! Handle parsing and normalization
//!
//! A handle is an identity reference of the form `localPart[@domain]`.
//! Locality is carried by the variant: a handle without a domain refers
//! to an account on the local instance, a handle with a domain refers to
//! a remote account. Conversion from local to remote always requires an
//! explicit domain; it is never inferred.

use crate::actor::Actor;
use crate::error::{FederationError, Result};
use std::fmt;

/// Parsed identity handle
///
/// Immutable value type created per parse call and discarded after use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Handle {
    /// Account on this instance (`alice`)
    Local { local_part: String },
    /// Account on a remote instance (`alice@remote.example`)
    Remote { local_part: String, domain: String },
}

impl Handle {
    /// Parse a handle in the form `[@] <local-part> ['@' <domain>]`
    ///
    /// The query is percent-decoded first since handles often arrive
    /// URL-encoded, then a single leading `@` is stripped.
    ///
    /// # Errors
    /// `InvalidHandle` when the local part contains characters outside
    /// `[A-Za-z0-9_.-]` or is empty.
    pub fn parse(query: &str) -> Result<Self> {
        let decoded = urlencoding::decode(query)
            .map_err(|_| FederationError::InvalidHandle(query.to_string()))?;

        let stripped = decoded.strip_prefix('@').unwrap_or(&decoded);

        let (local_part, domain) = match stripped.split_once('@') {
            Some((local, domain)) => (local, Some(domain)),
            None => (stripped, None),
        };

        if !is_valid_local_part(local_part) {
            return Err(FederationError::InvalidHandle(format!(
                "localPart: {}",
                local_part
            )));
        }

        match domain {
            Some(domain) => Ok(Handle::Remote {
                local_part: local_part.to_string(),
                domain: domain.to_string(),
            }),
            None => Ok(Handle::Local {
                local_part: local_part.to_string(),
            }),
        }
    }

    /// True iff the handle has no domain
    pub fn is_local(&self) -> bool {
        matches!(self, Handle::Local { .. })
    }

    /// Local part of either variant
    pub fn local_part(&self) -> &str {
        match self {
            Handle::Local { local_part } => local_part,
            Handle::Remote { local_part, .. } => local_part,
        }
    }

    /// Domain, present only for remote handles
    pub fn domain(&self) -> Option<&str> {
        match self {
            Handle::Local { .. } => None,
            Handle::Remote { domain, .. } => Some(domain),
        }
    }

    /// Attach a domain to a local handle
    ///
    /// A handle that is already remote is returned unchanged; the domain
    /// argument is ignored in that case.
    pub fn to_remote(&self, domain: &str) -> Handle {
        match self {
            Handle::Local { local_part } => Handle::Remote {
                local_part: local_part.clone(),
                domain: domain.to_string(),
            },
            Handle::Remote { .. } => self.clone(),
        }
    }

    /// Format a remote handle as an acct string (`localPart@domain`)
    ///
    /// Round-trips through `parse` to an equivalent handle. Returns
    /// `None` for local handles, which have no domain to format.
    pub fn to_acct(&self) -> Option<String> {
        match self {
            Handle::Local { .. } => None,
            Handle::Remote { local_part, domain } => Some(format!("{}@{}", local_part, domain)),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Local { local_part } => write!(f, "{}", local_part),
            Handle::Remote { local_part, domain } => write!(f, "{}@{}", local_part, domain),
        }
    }
}

fn is_valid_local_part(local_part: &str) -> bool {
    !local_part.is_empty()
        && local_part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
}

/// Derive a remote handle from an actor document
///
/// Uses `preferredUsername` when the actor advertises one. Otherwise the
/// local part is taken from the last path segment of the actor id URL and
/// the domain from its host. The fallback is a best-effort heuristic for
/// servers that omit `preferredUsername`; it is not authoritative.
pub fn actor_to_handle(actor: &Actor) -> Result<Handle> {
    let host = actor
        .id
        .host_str()
        .ok_or_else(|| FederationError::Validation(format!("actor id has no host: {}", actor.id)))?
        .to_string();

    if let Some(username) = &actor.preferred_username {
        return Ok(Handle::Remote {
            local_part: username.clone(),
            domain: host,
        });
    }

    let local_part = actor
        .id
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| {
            FederationError::Validation(format!("actor id has no path segments: {}", actor.id))
        })?;

    Ok(Handle::Remote {
        local_part: local_part.to_string(),
        domain: host,
    })
}

/// Derive an acct string (`localPart@domain`) from an actor document
///
/// Same fallback behavior as `actor_to_handle`.
pub fn actor_to_acct(actor: &Actor) -> Result<String> {
    let handle = actor_to_handle(actor)?;
    handle
        .to_acct()
        .ok_or_else(|| FederationError::Validation("derived handle has no domain".to_string()))
}
