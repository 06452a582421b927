//! Discovery of embedded resources in HTML documents.

use std::fmt;
use std::sync::{Arc, LazyLock};

use scraper::{Html, Selector};
use url::Url;

/// A type-erased, shareable [`LinkExtractor`] instance.
pub type BoxedLinkExtractor = Arc<dyn LinkExtractor>;

/// Extracts references to other resources from a document.
pub trait LinkExtractor: fmt::Debug + Send + Sync + 'static {
    /// Returns the absolute URLs referenced by `body`, resolved against `base`.
    ///
    /// The result is in document order and may contain duplicates.
    fn extract(&self, body: &str, base: &Url) -> Vec<Url>;
}

/// Matches every element carrying a `src` or `href` attribute.
static REFERENCES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[src], [href]").expect("static selector is valid"));

/// Extracts the values of all `src` and `href` attributes.
///
/// The document is parsed as HTML, so character references in attribute values are decoded and
/// markup inside comments is ignored. Values are resolved against the document URL with standard
/// relative-URL rules, so `//host/path` inherits the document's scheme. References that do not
/// resolve to an `http` or `https` URL (`mailto:`, `data:`, `javascript:`) are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttributeLinks;

impl LinkExtractor for AttributeLinks {
    fn extract(&self, body: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(body);

        document
            .select(&REFERENCES)
            .flat_map(|element| {
                let element = element.value();
                [element.attr("src"), element.attr("href")]
            })
            .flatten()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match base.join(value) {
                Ok(url) => Some(url),
                Err(err) => {
                    tracing::trace!(%base, value, %err, "skipping unresolvable reference");
                    None
                }
            })
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .collect()
    }
}
