//! Outbound federation messages
//!
//! An `Activity` is constructed per outbound intent, signed, delivered,
//! and discarded; this core never persists one. Activity ids are minted
//! under the sending actor's id so they are globally unique and
//! attributable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use url::Url;

/// ActivityStreams context attached to every outbound message
pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Federation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub kind: String,
    /// Unique activity URI, minted under the sending actor's id
    pub id: String,
    /// Sending actor id
    pub actor: Url,
    /// Object of the activity: a URI or an embedded object
    pub object: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

impl Activity {
    fn new(kind: &str, actor: &Url, object: Value) -> Self {
        Self {
            context: Value::String(ACTIVITYSTREAMS_CONTEXT.to_string()),
            kind: kind.to_string(),
            id: mint_activity_id(actor, kind),
            actor: actor.clone(),
            object,
            target: None,
            to: None,
            cc: None,
            published: None,
        }
    }

    /// Build a Follow activity
    ///
    /// # Arguments
    /// * `actor` - Actor id of the follower
    /// * `object` - Actor id of the followee
    pub fn follow(actor: &Url, object: &Url) -> Self {
        Self::new("Follow", actor, Value::String(object.to_string()))
    }

    /// Build an Undo wrapping a previously sent activity
    ///
    /// # Arguments
    /// * `actor` - Actor id of the sender
    /// * `undone` - The activity being undone, embedded by value
    pub fn undo(actor: &Url, undone: Value) -> Self {
        Self::new("Undo", actor, undone)
    }

    /// Build an Undo of a Follow relationship
    ///
    /// Embeds a reconstructed Follow object so the recipient can match
    /// the relationship even without the original activity id.
    pub fn undo_follow(actor: &Url, followee: &Url) -> Self {
        let follow = serde_json::json!({
            "type": "Follow",
            "id": mint_activity_id(actor, "Follow"),
            "actor": actor.to_string(),
            "object": followee.to_string(),
        });
        Self::new("Undo", actor, follow)
    }

    /// Build an Accept for a received activity (usually a Follow)
    pub fn accept(actor: &Url, object: Value) -> Self {
        Self::new("Accept", actor, object)
    }

    /// Build a Reject for a received activity
    pub fn reject(actor: &Url, object: Value) -> Self {
        Self::new("Reject", actor, object)
    }

    /// Serialize to the delivery wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Lowercase type label for metrics
    pub fn metric_label(&self) -> String {
        self.kind.to_lowercase()
    }
}

/// Mint a unique activity URI under an actor id
///
/// Shape: `<actor-id>/<kind>/<ulid>`
fn mint_activity_id(actor: &Url, kind: &str) -> String {
    format!("{}/{}/{}", actor, kind.to_lowercase(), Ulid::new())
}
