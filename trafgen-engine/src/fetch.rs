//! The transport capability used to retrieve a single URL.
//!
//! The engine only depends on the [`Fetch`] trait. [`HttpFetcher`] is the production
//! implementation on top of [`reqwest`]; tests substitute their own implementations to observe
//! or control transport behavior.

use std::error::Error as _;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("trafgen/", env!("CARGO_PKG_VERSION"));

/// A type-erased, shareable [`Fetch`] instance.
pub type BoxedFetch = Arc<dyn Fetch>;

/// Retrieves the contents of a URL.
#[async_trait::async_trait]
pub trait Fetch: fmt::Debug + Send + Sync + 'static {
    /// Fetches `url`, returning the response or a transport-level failure.
    ///
    /// Any HTTP response, including error statuses, counts as a successful fetch. Only failures
    /// to obtain a response at all are reported as [`FetchError`].
    async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError>;

    /// Fetches `url` and returns only the number of body bytes received.
    ///
    /// Implementations should avoid buffering the body. The default implementation delegates to
    /// [`fetch`](Self::fetch).
    async fn fetch_len(&self, url: &Url) -> Result<u64, FetchError> {
        self.fetch(url).await.map(|fetched| fetched.len())
    }
}

/// A successfully retrieved document.
#[derive(Clone, Debug)]
pub struct Fetched {
    /// The HTTP status code of the response.
    pub status: u16,
    /// The value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// The number of body bytes received.
    pub size: u64,
    /// The response body, if it was retained.
    ///
    /// [`HttpFetcher`] only retains HTML bodies, everything else is counted and discarded.
    pub body: Option<Bytes>,
}

impl Fetched {
    /// Creates a response that retains its full body.
    pub fn new(status: u16, content_type: Option<String>, body: Bytes) -> Self {
        Self {
            status,
            content_type,
            size: body.len() as u64,
            body: Some(body),
        }
    }

    /// The size of the response body in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Returns `true` if the response body is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns `true` if the body may contain references to embedded resources.
    ///
    /// Responses without a content type are treated as HTML.
    pub fn is_html(&self) -> bool {
        is_html(self.content_type.as_deref())
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    content_type.is_none_or(|content_type| content_type.to_ascii_lowercase().contains("html"))
}

/// The category of a transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FetchErrorKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// No connection could be established (refused, DNS failure, TLS handshake, bind failure).
    Connect,
    /// The request could not be built or sent.
    Request,
    /// The response body could not be read to completion.
    Body,
    /// Any other failure.
    Other,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Connect => "connect",
            FetchErrorKind::Request => "request",
            FetchErrorKind::Body => "body",
            FetchErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// A transport failure, carried as data instead of aborting the caller.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    /// The failure category.
    pub kind: FetchErrorKind,
    /// A human-readable description including the underlying cause.
    pub message: String,
}

impl FetchError {
    /// Creates a new fetch error.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if err.is_connect() {
            FetchErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            FetchErrorKind::Body
        } else if err.is_request() || err.is_builder() || err.is_redirect() {
            FetchErrorKind::Request
        } else {
            FetchErrorKind::Other
        };

        // reqwest only displays the outermost error, the interesting part is in the chain.
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        FetchError { kind, message }
    }
}

/// Transport options for [`HttpFetcher`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Total time allowed for a single fetch, including reading the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Time allowed to establish a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Local address every outbound connection is bound to.
    pub source_address: Option<IpAddr>,

    /// Network interface every outbound connection is bound to.
    ///
    /// Only honored on Linux, Android and Fuchsia.
    pub interface: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            source_address: None,
            interface: None,
        }
    }
}

/// A [`Fetch`] implementation issuing `GET` requests with [`reqwest`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given transport options.
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .local_address(options.source_address);

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        {
            if let Some(interface) = &options.interface {
                builder = builder.interface(interface);
            }
        }
        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        {
            if options.interface.is_some() {
                tracing::warn!("binding to an interface is not supported on this platform");
            }
        }

        let client = builder.build().map_err(Error::HttpClient)?;
        Ok(Self { client })
    }

    /// Creates a fetcher wrapping an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        if !is_html(content_type.as_deref()) {
            let size = count_body(response).await?;
            return Ok(Fetched {
                status,
                content_type,
                size,
                body: None,
            });
        }

        let body = response.bytes().await?;
        Ok(Fetched::new(status, content_type, body))
    }

    async fn fetch_len(&self, url: &Url) -> Result<u64, FetchError> {
        let response = self.client.get(url.clone()).send().await?;
        count_body(response).await
    }
}

/// Drains the response body, counting its bytes without buffering it.
async fn count_body(response: reqwest::Response) -> Result<u64, FetchError> {
    let mut stream = response.bytes_stream();
    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        size += chunk?.len() as u64;
    }
    Ok(size)
}
