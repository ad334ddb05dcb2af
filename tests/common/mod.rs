//! Common test utilities: a scriptable mock remote instance
//!
//! Spins up a real HTTP server on a random loopback port acting as the
//! federated peer: it serves actor documents, WebFinger records, and
//! collection pages, and records everything POSTed to its inboxes.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use url::Url;

/// An activity as received by a mock inbox
#[derive(Debug, Clone)]
pub struct ReceivedActivity {
    pub body: Value,
    /// Exact bytes posted, for digest and signature verification
    pub raw_body: Vec<u8>,
    pub signature: Option<String>,
    pub digest: Option<String>,
    pub date: Option<String>,
    pub host: Option<String>,
    pub content_type: Option<String>,
}

/// Shared RSA keypair so each test binary generates it once
///
/// Returns `(private_key_pem, public_key_pem)`.
#[allow(dead_code)]
pub fn test_keypair() -> &'static (String, String) {
    static KEYPAIR: std::sync::OnceLock<(String, String)> = std::sync::OnceLock::new();
    KEYPAIR.get_or_init(|| fedkit::keys::generate_keypair(2048).unwrap())
}

#[derive(Default)]
struct MockState {
    /// Path -> JSON document (actors, collection roots, pages)
    documents: Mutex<HashMap<String, Value>>,
    /// WebFinger resource -> JRD
    webfinger: Mutex<HashMap<String, Value>>,
    /// Everything POSTed to an inbox, in arrival order
    inbox: Mutex<Vec<ReceivedActivity>>,
    /// Status returned by inbox handlers (default 202)
    inbox_status: AtomicU16,
    /// Fail this many inbox posts with `inbox_status` before accepting
    inbox_failures_remaining: AtomicU32,
    /// Path -> GET count
    fetch_counts: Mutex<HashMap<String, usize>>,
}

/// Mock federated peer
pub struct MockRemote {
    /// `host:port` of the listening socket
    pub host: String,
    state: Arc<MockState>,
}

#[allow(dead_code)]
impl MockRemote {
    /// Bind a random loopback port and start serving
    pub async fn serve() -> Self {
        let state = Arc::new(MockState {
            inbox_status: AtomicU16::new(202),
            ..MockState::default()
        });

        let app = Router::new()
            .route("/.well-known/webfinger", get(webfinger_handler))
            .route("/inbox", post(inbox_handler))
            .route("/users/:name/inbox", post(inbox_handler))
            .fallback(document_handler)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            host: addr.to_string(),
            state,
        }
    }

    /// Absolute URL for a path on this mock
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.host, path)).unwrap()
    }

    /// Serve a JSON document at a path
    pub fn add_document(&self, path: &str, document: Value) {
        self.state
            .documents
            .lock()
            .unwrap()
            .insert(path.to_string(), document);
    }

    /// Serve an actor document with a personal inbox, plus the matching
    /// WebFinger record for `acct:<username>@<host>`
    ///
    /// Returns the actor id URL.
    pub fn add_actor(&self, username: &str, public_key_pem: Option<&str>) -> Url {
        let actor_path = format!("/users/{}", username);
        let actor_url = self.url(&actor_path);
        let inbox_url = self.url(&format!("{}/inbox", actor_path));

        let mut actor = json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "id": actor_url.as_str(),
            "type": "Person",
            "preferredUsername": username,
            "inbox": inbox_url.as_str(),
            "outbox": self.url(&format!("{}/outbox", actor_path)).as_str(),
        });
        if let Some(pem) = public_key_pem {
            actor["publicKey"] = json!({
                "id": format!("{}#main-key", actor_url),
                "owner": actor_url.as_str(),
                "publicKeyPem": pem,
            });
        }
        self.add_document(&actor_path, actor);

        let resource = format!("acct:{}@{}", username, self.host);
        let jrd = json!({
            "subject": resource.as_str(),
            "links": [{
                "rel": "self",
                "type": "application/activity+json",
                "href": actor_url.as_str(),
            }]
        });
        self.state
            .webfinger
            .lock()
            .unwrap()
            .insert(resource, jrd);

        actor_url
    }

    /// Serve an ordered collection root at `<base>` with one page per
    /// items slice, chained by `next` cursors
    pub fn add_collection(&self, base: &str, pages: &[&[Value]]) {
        let total: usize = pages.iter().map(|items| items.len()).sum();
        self.add_document(
            base,
            json!({
                "type": "OrderedCollection",
                "totalItems": total,
                "first": self.url(&format!("{}/page/1", base)).as_str(),
            }),
        );

        for (index, items) in pages.iter().enumerate() {
            let number = index + 1;
            let mut page = json!({
                "type": "OrderedCollectionPage",
                "orderedItems": items,
            });
            if number < pages.len() {
                page["next"] =
                    Value::String(self.url(&format!("{}/page/{}", base, number + 1)).to_string());
            }
            self.add_document(&format!("{}/page/{}", base, number), page);
        }
    }

    /// Status for inbox posts (default 202)
    pub fn set_inbox_status(&self, status: u16) {
        self.state.inbox_status.store(status, Ordering::SeqCst);
    }

    /// Fail the next `count` inbox posts with the configured status,
    /// then accept
    pub fn fail_inbox_times(&self, count: u32) {
        self.state
            .inbox_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Activities received so far, in arrival order
    pub fn received(&self) -> Vec<ReceivedActivity> {
        self.state.inbox.lock().unwrap().clone()
    }

    /// How many GETs a path has served
    pub fn fetch_count(&self, path: &str) -> usize {
        self.state
            .fetch_counts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

async fn document_handler(State(state): State<Arc<MockState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();

    {
        let mut counts = state.fetch_counts.lock().unwrap();
        *counts.entry(path.clone()).or_insert(0) += 1;
    }

    let document = state.documents.lock().unwrap().get(&path).cloned();
    match document {
        Some(document) => Json(document).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn webfinger_handler(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(resource) = params.get("resource") else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let jrd = state.webfinger.lock().unwrap().get(resource).cloned();
    match jrd {
        Some(jrd) => Json(jrd).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn inbox_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.inbox.lock().unwrap().push(ReceivedActivity {
        body: parsed,
        raw_body: body.to_vec(),
        signature: header_string(&headers, "signature"),
        digest: header_string(&headers, "digest"),
        date: header_string(&headers, "date"),
        host: header_string(&headers, "host"),
        content_type: header_string(&headers, "content-type"),
    });

    // Scripted transient failures always answer 500
    let failing = state
        .inbox_failures_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok();
    if failing {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let status = state.inbox_status.load(Ordering::SeqCst);
    StatusCode::from_u16(status)
        .unwrap_or(StatusCode::ACCEPTED)
        .into_response()
}
