//! Configuration for the traffic generator.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags of the `run` command
//! 2. Environment variables (prefixed with `TG__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `TG__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `TG__TARGETS__PATH=urls.csv` sets the target file
//! - `TG__RUN__RATE__RPS=50` sets a fixed rate of 50 requests per second
//! - `TG__HTTP__SOURCE_ADDRESS=10.60.0.1` binds all connections to a local address
//!
//! # YAML Configuration File
//!
//! ```yaml
//! targets:
//!   path: urls.csv
//!
//! run:
//!   total_requests: 1000
//!   rate:
//!     type: fixed
//!     rps: 50
//!   zipf:
//!     q: 2.7
//!     s: 1.2
//!
//! http:
//!   timeout: 10s
//!   interface: uesimtun0
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::providers::{Env, Format as _, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use trafgen_engine::dispatch::DEFAULT_CONCURRENCY;
use trafgen_engine::forecast::RateSource;
use trafgen_engine::resources::DEFAULT_SUBRESOURCE_CONCURRENCY;
use trafgen_engine::sampler::ZipfParams;
use trafgen_engine::sink::Format;
use trafgen_engine::targets::DEFAULT_COLUMN;
use trafgen_engine::{HttpOptions, Pacing};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "TG__";

/// Where the ranked target set is read from.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Targets {
    /// CSV file listing one target URL per row, most popular first.
    pub path: PathBuf,
    /// Header of the column holding the URLs.
    pub column: String,
    /// Only use the first `limit` targets.
    pub limit: Option<usize>,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            path: PathBuf::from("urls.csv"),
            column: DEFAULT_COLUMN.to_owned(),
            limit: None,
        }
    }
}

/// Shape of the generated traffic.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Run {
    /// Number of logical requests to issue.
    pub total_requests: usize,
    /// Request rate, either fixed or forecast from features.
    pub rate: RateSource,
    /// Popularity distribution over the ranked targets.
    pub zipf: ZipfParams,
    /// Maximum number of requests in flight.
    pub concurrency: usize,
    /// Whether requests are spread evenly or submitted in batches.
    pub pacing: Pacing,
    /// Seed for target selection. Runs are not reproducible without one.
    pub seed: Option<u64>,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            total_requests: 100,
            rate: RateSource::default(),
            zipf: ZipfParams::default(),
            concurrency: DEFAULT_CONCURRENCY,
            pacing: Pacing::default(),
            seed: None,
        }
    }
}

/// Transport settings and sub-resource expansion.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// Timeouts and outbound binding of the HTTP client.
    #[serde(flatten)]
    pub client: HttpOptions,
    /// Whether embedded resources of HTML documents are loaded too.
    pub expand_subresources: bool,
    /// Maximum number of sub-resources loaded concurrently for one page.
    pub subresource_concurrency: usize,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            client: HttpOptions::default(),
            expand_subresources: true,
            subresource_concurrency: DEFAULT_SUBRESOURCE_CONCURRENCY,
        }
    }
}

/// The request log.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Output {
    /// File the log is written to. Truncated at the start of every run.
    pub path: PathBuf,
    /// Field separator.
    pub format: Format,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            path: PathBuf::from("request_log.csv"),
            format: Format::Csv,
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads.
    ///
    /// Defaults to the number of CPU cores on the host machine.
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting.
///
/// Sentry is disabled unless a DSN is configured.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    pub dsn: Option<String>,
    /// Environment name, such as `lab` or `staging`.
    pub environment: Option<Cow<'static, str>>,
    /// Error event sampling rate.
    pub sample_rate: f32,
    /// Enable Sentry SDK debug mode.
    pub debug: bool,
    /// Additional tags to attach to all Sentry events.
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Every completed request is logged at `INFO`. The `RUST_LOG` environment variable provides
    /// more granular control per module if needed.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Complete configuration of a traffic generator run.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Source of the ranked target set.
    pub targets: Targets,
    /// Shape of the generated traffic.
    pub run: Run,
    /// Transport settings.
    pub http: Http,
    /// The request log.
    pub output: Output,
    /// Log verbosity and format.
    pub logging: Logging,
    /// Error reporting.
    pub sentry: Sentry,
    /// Async runtime settings.
    pub runtime: Runtime,
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// Later sources override earlier ones.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
