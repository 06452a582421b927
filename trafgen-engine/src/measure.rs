//! Measurement of a single logical request.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use url::Url;

use crate::resources::{PageLoad, ResourceGraph};

/// The lowest RTT ever reported, in milliseconds.
///
/// Sub-millisecond loads are rounded up so throughput never divides by zero.
pub const MIN_RTT_MS: f64 = 1.0;

/// Converts an elapsed duration into the reported RTT in milliseconds.
pub fn rtt_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).max(MIN_RTT_MS)
}

/// The outcome of a request as written to the log.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    /// The primary document was retrieved with this HTTP status code.
    Code(u16),
    /// The primary document could not be retrieved.
    Failed(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Code(code) => write!(f, "{code}"),
            Status::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// The measurements of one logical request: a page and its embedded resources.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRecord {
    /// The sampled target.
    pub url: Url,
    /// Wall-clock time at which the request started.
    pub start_time: SystemTime,
    /// Wall-clock time at which the request and all of its sub-resources completed.
    pub end_time: SystemTime,
    /// Round-trip time in milliseconds, never below [`MIN_RTT_MS`].
    pub rtt_ms: f64,
    /// Status code of the primary document or the failure description.
    pub status: Status,
    /// Total bytes of the document and its sub-resources.
    pub content_size: u64,
    /// `content_size / rtt_ms`, in bytes per millisecond.
    pub throughput: f64,
}

impl RequestRecord {
    /// Builds a record from a completed page load.
    ///
    /// Failed loads still report their RTT, but carry no size and no throughput.
    pub fn new(
        url: Url,
        start_time: SystemTime,
        end_time: SystemTime,
        elapsed: Duration,
        load: &PageLoad,
    ) -> Self {
        let rtt_ms = rtt_ms(elapsed);
        let (status, content_size) = match &load.primary {
            Ok(code) => (Status::Code(*code), load.total_bytes),
            Err(err) => (Status::Failed(err.to_string()), 0),
        };

        Self {
            url,
            start_time,
            end_time,
            rtt_ms,
            status,
            content_size,
            throughput: content_size as f64 / rtt_ms,
        }
    }

    /// Returns `true` if the primary document was retrieved.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Code(_))
    }
}

/// Times page loads and turns them into [`RequestRecord`]s.
#[derive(Clone, Debug)]
pub struct Recorder {
    graph: ResourceGraph,
}

impl Recorder {
    /// Creates a recorder measuring loads through the given resource graph.
    pub fn new(graph: ResourceGraph) -> Self {
        Self { graph }
    }

    /// Loads `url` with its sub-resources and records how long it took.
    pub async fn measure(&self, url: &Url) -> RequestRecord {
        let start_time = SystemTime::now();
        let start = Instant::now();

        let load = self.graph.fetch_total_size(url).await;

        let elapsed = start.elapsed();
        let end_time = SystemTime::now();

        tracing::trace!(
            %url,
            subresources = load.subresources,
            failed_subresources = load.failed_subresources,
            "page loaded"
        );

        RequestRecord::new(url.clone(), start_time, end_time, elapsed, &load)
    }
}
