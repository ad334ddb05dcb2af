//! Collection pagination over HTTP against a mock remote

mod common;

use common::MockRemote;
use fedkit::collection::{CollectionWalker, OrderedCollection};
use fedkit::fetch::RemoteFetcher;
use serde_json::{Value, json};

fn fetcher() -> RemoteFetcher {
    RemoteFetcher::new(reqwest::Client::new(), true)
}

fn note(id: u32) -> Value {
    json!({ "type": "Note", "content": format!("post {}", id) })
}

#[tokio::test]
async fn walks_every_page_of_a_remote_outbox() {
    let remote = MockRemote::serve().await;
    remote.add_collection(
        "/users/alice/outbox",
        &[
            &[note(1), note(2)],
            &[note(3), note(4)],
            &[note(5), note(6)],
        ],
    );

    let fetcher = fetcher();
    let root: OrderedCollection<Value> = fetcher
        .fetch_metadata(&remote.url("/users/alice/outbox"))
        .await
        .expect("root fetches");
    assert_eq!(root.total_items, 6);

    let items = CollectionWalker::new(100)
        .load_items(&fetcher, &root, None)
        .await;

    assert_eq!(items.len(), 6);
    assert_eq!(items[0]["content"], "post 1");
    assert_eq!(items[5]["content"], "post 6");
    assert_eq!(remote.fetch_count("/users/alice/outbox/page/1"), 1);
    assert_eq!(remote.fetch_count("/users/alice/outbox/page/2"), 1);
    assert_eq!(remote.fetch_count("/users/alice/outbox/page/3"), 1);
}

#[tokio::test]
async fn item_limit_stops_fetching_once_satisfied() {
    let remote = MockRemote::serve().await;
    remote.add_collection(
        "/users/alice/outbox",
        &[
            &[note(1), note(2)],
            &[note(3), note(4)],
            &[note(5), note(6)],
        ],
    );

    let fetcher = fetcher();
    let root: OrderedCollection<Value> = fetcher
        .fetch_metadata(&remote.url("/users/alice/outbox"))
        .await
        .expect("root fetches");

    let items = CollectionWalker::new(100)
        .load_items(&fetcher, &root, Some(3))
        .await;

    assert_eq!(items.len(), 3);
    // The second page satisfied the limit; the third is never requested
    assert_eq!(remote.fetch_count("/users/alice/outbox/page/3"), 0);
}

#[tokio::test]
async fn broken_continuation_yields_partial_items() {
    let remote = MockRemote::serve().await;
    remote.add_document(
        "/users/alice/outbox",
        json!({
            "type": "OrderedCollection",
            "totalItems": 4,
            "first": remote.url("/users/alice/outbox/page/1").as_str(),
        }),
    );
    // Page 1 exists; its next cursor points at a page the remote dropped
    remote.add_document(
        "/users/alice/outbox/page/1",
        json!({
            "type": "OrderedCollectionPage",
            "orderedItems": [note(1), note(2)],
            "next": remote.url("/users/alice/outbox/page/gone").as_str(),
        }),
    );

    let fetcher = fetcher();
    let root: OrderedCollection<Value> = fetcher
        .fetch_metadata(&remote.url("/users/alice/outbox"))
        .await
        .expect("root fetches");

    let items = CollectionWalker::new(100)
        .load_items(&fetcher, &root, None)
        .await;

    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn missing_root_is_a_hard_error() {
    let remote = MockRemote::serve().await;

    let result: Result<OrderedCollection<Value>, _> = fetcher()
        .fetch_metadata(&remote.url("/users/ghost/outbox"))
        .await;

    assert!(matches!(
        result,
        Err(fedkit::error::FederationError::RemoteFetch { status: 404, .. })
    ));
}
