use thiserror::Error;

/// Errors that can occur while configuring or running the traffic generator.
///
/// Transport failures of individual requests are not represented here. Those are recorded as
/// data on the [`RequestRecord`](crate::measure::RequestRecord) and never abort a run.
#[derive(Debug, Error)]
pub enum Error {
    /// The Zipf-Mandelbrot parameters or the target count cannot produce a distribution.
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    /// The request rate does not yield a positive, finite submission interval.
    #[error("invalid request rate {0}: must be a finite number greater than zero")]
    InvalidRate(f64),

    /// Any other invalid run configuration, such as a zero concurrency limit.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The target set is empty.
    #[error("target set is empty")]
    EmptyTargets,

    /// A target could not be parsed as an absolute URL.
    #[error("invalid target URL `{url}`")]
    InvalidTarget {
        /// The trimmed cell of the targets file that failed to parse.
        url: String,
        /// The parse failure, typically a missing scheme or host.
        #[source]
        cause: url::ParseError,
    },

    /// Errors reading or writing CSV files.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// I/O errors, such as failing to open the output file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The rate forecaster could not produce a value.
    #[error("rate forecast failed: {0}")]
    Forecast(String),

    /// The task collecting records failed.
    #[error("record collector failed")]
    Collector(#[from] tokio::task::JoinError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
