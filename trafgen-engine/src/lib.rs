//! A synthetic HTTP traffic generator.
//!
//! The engine issues a configured number of requests against a ranked set of target URLs.
//! Targets are drawn from a *Zipf-Mandelbrot* distribution, so a few popular targets receive
//! most of the traffic while a long tail is requested rarely.
//!
//! Every logical request loads the target document together with the resources it directly
//! embeds (scripts, images, stylesheets), approximating what a browser would transfer. For each
//! request the engine records timing, status and payload size, and appends it to a CSV log. At the
//! end of a run, totals and averages are appended as well.
//!
//! Requests are submitted at a configured rate through a bounded worker pool, see
//! [`Dispatcher`]. The rate can be fixed or predicted by a [`RateForecaster`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod aggregate;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod forecast;
pub mod links;
pub mod measure;
pub mod resources;
pub mod sampler;
pub mod sink;
pub mod targets;

pub use crate::aggregate::{RunStats, Summary};
pub use crate::dispatch::{DispatchConfig, Dispatcher, Pacing, RunState};
pub use crate::error::{Error, Result};
pub use crate::fetch::{Fetch, HttpFetcher, HttpOptions};
pub use crate::forecast::{RateForecaster, RateSource};
pub use crate::measure::{Recorder, RequestRecord};
pub use crate::resources::ResourceGraph;
pub use crate::sampler::TargetSampler;
pub use crate::sink::{FileSink, RecordSink};

/// Runs `dispatcher` to completion and appends the summary rows to `sink`.
///
/// Returns the statistics of the run. A failure to write the summary is logged, but does not
/// discard the results.
pub async fn run<S: RecordSink>(dispatcher: Dispatcher, sink: S) -> Result<RunStats> {
    let output = dispatcher.run(sink).await?;
    let stats = RunStats::from_records(&output.records, output.elapsed);

    let mut sink = output.sink;
    if let Err(err) = crate::sink::write_blocking(|| sink.append_summary(&stats.summary)) {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            "failed to write summary to log"
        );
    }

    Ok(stats)
}
