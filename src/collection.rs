//! Ordered collections and cursor-based pagination
//!
//! Remote servers expose paginated sequences as an `OrderedCollection`
//! root pointing at a chain of `OrderedCollectionPage` documents linked
//! by `next` cursors. The walk is strictly sequential: the URL of page
//! k+1 is only known after page k has been fetched.

use crate::error::Result;
use crate::fetch::{PageFetch, RemoteFetcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Collection root describing how many items exist and where the first
/// page begins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection<T> {
    #[serde(default)]
    pub total_items: u64,
    /// Where the page chain starts
    pub first: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// One page of items plus an optional cursor to the next page
///
/// A page with no `next` terminates the walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage<T> {
    #[serde(default = "Vec::new")]
    pub ordered_items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Source of collection pages
///
/// Implemented by `RemoteFetcher` for the network case; tests substitute
/// scripted sources to drive the walker without I/O.
pub trait PageSource<T> {
    fn fetch_page(
        &self,
        url: &Url,
    ) -> impl std::future::Future<Output = PageFetch<OrderedCollectionPage<T>>> + Send;
}

impl<T: DeserializeOwned + Send> PageSource<T> for RemoteFetcher {
    async fn fetch_page(&self, url: &Url) -> PageFetch<OrderedCollectionPage<T>> {
        self.fetch_page_value(url).await
    }
}

impl RemoteFetcher {
    /// Fetch a mandatory collection root document
    ///
    /// # Errors
    /// `RemoteFetch` on a non-success status: the root is required for
    /// the caller to proceed, unlike continuation pages.
    pub async fn fetch_metadata<T: DeserializeOwned>(
        &self,
        url: &Url,
    ) -> Result<OrderedCollection<T>> {
        self.fetch_object(url).await
    }
}

/// Sequential collection walker
///
/// `max_pages` bounds the walk independently of any item limit so a
/// remote that loops its `next` cursors cannot keep us fetching forever.
#[derive(Debug, Clone, Copy)]
pub struct CollectionWalker {
    max_pages: usize,
}

impl CollectionWalker {
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }

    /// Accumulate items by walking the page chain from `collection.first`
    ///
    /// Termination, checked in order after each page is appended:
    /// 1. no page was returned: keep what has been accumulated
    /// 2. `max` is set and reached: return exactly the first `max` items
    ///    without fetching past the page that satisfied the bound
    /// 3. the page has no `next` cursor: return accumulated items
    ///
    /// Soft page failures end the walk with partial results; they are
    /// logged here rather than surfaced to the caller.
    pub async fn load_items<T, S>(
        &self,
        source: &S,
        collection: &OrderedCollection<T>,
        max: Option<usize>,
    ) -> Vec<T>
    where
        S: PageSource<T>,
    {
        let mut items: Vec<T> = Vec::new();
        let mut page_url = collection.first.clone();
        let mut pages_walked = 0usize;

        loop {
            if pages_walked >= self.max_pages {
                tracing::warn!(
                    page_cap = self.max_pages,
                    collected = items.len(),
                    "Collection walk hit page cap, returning partial result"
                );
                return items;
            }

            let page = match source.fetch_page(&page_url).await {
                PageFetch::Page(page) => page,
                PageFetch::Missing { status } => {
                    tracing::warn!(url = %page_url, status, "Collection page unavailable");
                    return items;
                }
                PageFetch::Failed(err) => {
                    tracing::warn!(url = %page_url, error = %err, "Collection page fetch failed");
                    return items;
                }
            };
            pages_walked += 1;

            items.extend(page.ordered_items);

            if let Some(max) = max {
                if items.len() >= max {
                    items.truncate(max);
                    return items;
                }
            }

            match page.next {
                Some(next) => match Url::parse(&next) {
                    Ok(next_url) => page_url = next_url,
                    Err(err) => {
                        tracing::warn!(cursor = %next, error = %err, "Unparseable next cursor");
                        return items;
                    }
                },
                None => return items,
            }
        }
    }
}

/// Walk a collection with the crate-default page cap
///
/// Convenience for callers that do not carry a configured walker.
pub async fn load_items<T, S>(
    source: &S,
    collection: &OrderedCollection<T>,
    max: Option<usize>,
) -> Vec<T>
where
    S: PageSource<T>,
{
    CollectionWalker::new(DEFAULT_MAX_PAGES)
        .load_items(source, collection, max)
        .await
}

/// Default page cap matching `pagination.max_pages`
pub const DEFAULT_MAX_PAGES: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted page source: URL -> page, counting fetches
    struct ScriptedPages {
        pages: HashMap<String, OrderedCollectionPage<u32>>,
        fetches: AtomicUsize,
    }

    impl ScriptedPages {
        fn new(pages: Vec<(&str, OrderedCollectionPage<u32>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(url, page)| (url.to_string(), page))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl PageSource<u32> for ScriptedPages {
        async fn fetch_page(&self, url: &Url) -> PageFetch<OrderedCollectionPage<u32>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url.as_str()) {
                Some(page) => PageFetch::Page(page.clone()),
                None => PageFetch::Missing { status: 404 },
            }
        }
    }

    fn page(items: &[u32], next: Option<&str>) -> OrderedCollectionPage<u32> {
        OrderedCollectionPage {
            ordered_items: items.to_vec(),
            next: next.map(str::to_string),
        }
    }

    fn collection(first: &str, total: u64) -> OrderedCollection<u32> {
        OrderedCollection {
            total_items: total,
            first: Url::parse(first).expect("valid first url"),
            last: None,
            current: None,
            items: Vec::new(),
        }
    }

    fn three_pages() -> ScriptedPages {
        ScriptedPages::new(vec![
            (
                "https://remote.example/outbox/1",
                page(&[1, 2], Some("https://remote.example/outbox/2")),
            ),
            (
                "https://remote.example/outbox/2",
                page(&[3, 4], Some("https://remote.example/outbox/3")),
            ),
            ("https://remote.example/outbox/3", page(&[5, 6], None)),
        ])
    }

    #[tokio::test]
    async fn walks_all_pages_without_max() {
        let source = three_pages();
        let root = collection("https://remote.example/outbox/1", 6);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, None)
            .await;

        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn max_truncates_and_stops_fetching_early() {
        let source = three_pages();
        let root = collection("https://remote.example/outbox/1", 6);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, Some(3))
            .await;

        assert_eq!(items, vec![1, 2, 3]);
        // The second page satisfied the bound; the third is never fetched
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn missing_first_page_yields_empty_result() {
        let source = ScriptedPages::new(vec![]);
        let root = collection("https://remote.example/outbox/1", 0);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, None)
            .await;

        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn missing_continuation_page_keeps_partial_result() {
        let source = ScriptedPages::new(vec![(
            "https://remote.example/outbox/1",
            page(&[1, 2], Some("https://remote.example/outbox/missing")),
        )]);
        let root = collection("https://remote.example/outbox/1", 4);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, None)
            .await;

        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn stops_on_missing_next_even_below_max() {
        let source = ScriptedPages::new(vec![(
            "https://remote.example/outbox/1",
            page(&[1, 2], None),
        )]);
        let root = collection("https://remote.example/outbox/1", 2);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, Some(10))
            .await;

        assert_eq!(items, vec![1, 2]);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn page_cap_breaks_cursor_loops() {
        // Page points at itself: an adversarial `next` cycle
        let source = ScriptedPages::new(vec![(
            "https://remote.example/outbox/loop",
            page(&[7], Some("https://remote.example/outbox/loop")),
        )]);
        let root = collection("https://remote.example/outbox/loop", 1);

        let items = CollectionWalker::new(5)
            .load_items(&source, &root, None)
            .await;

        assert_eq!(items.len(), 5);
        assert_eq!(source.fetch_count(), 5);
    }

    #[tokio::test]
    async fn unparseable_next_cursor_ends_walk() {
        let source = ScriptedPages::new(vec![(
            "https://remote.example/outbox/1",
            page(&[1], Some("not a url")),
        )]);
        let root = collection("https://remote.example/outbox/1", 1);

        let items = CollectionWalker::new(100)
            .load_items(&source, &root, None)
            .await;

        assert_eq!(items, vec![1]);
    }

    #[test]
    fn collection_root_deserializes_wire_shape() {
        let json = serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "OrderedCollection",
            "totalItems": 6,
            "first": "https://remote.example/outbox/1",
            "last": "https://remote.example/outbox/3"
        });

        let root: OrderedCollection<serde_json::Value> =
            serde_json::from_value(json).expect("root deserializes");
        assert_eq!(root.total_items, 6);
        assert!(root.items.is_empty());
    }
}
