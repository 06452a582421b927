//! Computes the realistic payload of a page: the document plus its directly embedded resources.

use futures_util::{StreamExt, stream};
use url::Url;

use crate::fetch::{BoxedFetch, FetchError};
use crate::links::{AttributeLinks, BoxedLinkExtractor};

/// Default number of sub-resources fetched concurrently for one page.
pub const DEFAULT_SUBRESOURCE_CONCURRENCY: usize = 10;

/// The outcome of loading one page and its sub-resources.
#[derive(Clone, Debug, PartialEq)]
pub struct PageLoad {
    /// The status code of the primary document, or the failure that prevented fetching it.
    pub primary: Result<u16, FetchError>,
    /// Size of the primary document body.
    pub primary_bytes: u64,
    /// Number of sub-resources that were fetched successfully.
    pub subresources: usize,
    /// Number of sub-resources that could not be fetched.
    pub failed_subresources: usize,
    /// Primary bytes plus the bytes of all successfully fetched sub-resources.
    pub total_bytes: u64,
}

impl PageLoad {
    fn failed(err: FetchError) -> Self {
        Self {
            primary: Err(err),
            primary_bytes: 0,
            subresources: 0,
            failed_subresources: 0,
            total_bytes: 0,
        }
    }
}

/// Fetches a document and expands it by exactly one level of embedded resources.
///
/// Sub-resources are never expanded themselves. Failures are absorbed: a failed primary fetch
/// yields zero bytes, a failed sub-resource contributes zero bytes without affecting its
/// siblings or the primary status.
#[derive(Clone, Debug)]
pub struct ResourceGraph {
    fetcher: BoxedFetch,
    extractor: BoxedLinkExtractor,
    expand: bool,
    concurrency: usize,
}

impl ResourceGraph {
    /// Creates a resource graph on top of the given fetcher, extracting `src` and `href` links.
    pub fn new(fetcher: BoxedFetch) -> Self {
        Self {
            fetcher,
            extractor: std::sync::Arc::new(AttributeLinks),
            expand: true,
            concurrency: DEFAULT_SUBRESOURCE_CONCURRENCY,
        }
    }

    /// Replaces the strategy used to discover sub-resources.
    pub fn link_extractor(mut self, extractor: BoxedLinkExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Enables or disables following embedded links. Enabled by default.
    pub fn expand_subresources(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    /// The maximum number of sub-resources fetched concurrently for one page.
    pub fn subresource_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Loads `url` and its direct sub-resources, returning the aggregate size.
    pub async fn fetch_total_size(&self, url: &Url) -> PageLoad {
        let document = match self.fetcher.fetch(url).await {
            Ok(document) => document,
            Err(err) => return PageLoad::failed(err),
        };

        let primary_bytes = document.len();
        let links = match &document.body {
            Some(body) if self.expand && document.is_html() => {
                let body = String::from_utf8_lossy(body);
                self.extractor.extract(&body, url)
            }
            _ => Vec::new(),
        };

        let (subresources, failed_subresources, subresource_bytes) = stream::iter(links)
            .map(|link| async move {
                let result = self.fetcher.fetch_len(&link).await;
                (link, result)
            })
            .buffer_unordered(self.concurrency)
            .fold((0, 0, 0), |(ok, failed, bytes), (link, result)| async move {
                match result {
                    Ok(len) => (ok + 1, failed, bytes + len),
                    Err(err) => {
                        tracing::debug!(%link, %err, "failed to fetch sub-resource");
                        (ok, failed + 1, bytes)
                    }
                }
            })
            .await;

        PageLoad {
            primary: Ok(document.status),
            primary_bytes,
            subresources,
            failed_subresources,
            total_bytes: primary_bytes + subresource_bytes,
        }
    }
}
