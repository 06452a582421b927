//! The rate-limited dispatcher driving a run.
//!
//! A single control loop draws targets, waits for a free slot in the worker pool and spawns one
//! worker per request, pausing between submissions to hold the configured rate. Submissions do
//! not wait for earlier requests to complete: the offered load is controlled, not the completed
//! throughput. The only backpressure is the concurrency limit.
//!
//! Workers send their [`RequestRecord`] over a channel to a single collector task, which owns the
//! result list and the [`RecordSink`]. Completion order is therefore arbitrary.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use crate::error::{Error, Result};
use crate::measure::{Recorder, RequestRecord};
use crate::sampler::TargetSampler;
use crate::sink::{RecordSink, write_blocking};

/// Default number of requests in flight at the same time.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// How submissions are spread over time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pacing {
    /// One submission every `1 / rate` seconds.
    #[default]
    Steady,
    /// `rate × window` submissions at once, followed by a pause of `window`.
    Burst {
        /// Length of one batch period.
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
}

/// Parameters of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    /// Number of requests to submit.
    pub total_requests: usize,
    /// Target submission rate in requests per second.
    pub rate: f64,
    /// Maximum number of requests in flight.
    pub concurrency: usize,
    /// Distribution of submissions over time.
    pub pacing: Pacing,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            rate: 10.0,
            concurrency: DEFAULT_CONCURRENCY,
            pacing: Pacing::Steady,
        }
    }
}

/// Returns the pause between two submissions at `rate` requests per second.
///
/// Rates that do not yield a positive, representable interval are rejected.
pub fn submission_interval(rate: f64) -> Result<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidRate(rate));
    }

    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => Err(Error::InvalidRate(rate)),
    }
}

/// The lifecycle of a [`Dispatcher`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RunState {
    /// Configured, not yet started.
    Idle,
    /// Submitting requests.
    Running,
    /// All requests submitted, waiting for in-flight requests.
    Draining,
    /// All requests completed and collected.
    Done,
}

/// The result of a finished run.
#[derive(Debug)]
pub struct RunOutput<S> {
    /// All collected records, in completion order.
    pub records: Vec<RequestRecord>,
    /// The sink, handed back so the summary can be appended.
    pub sink: S,
    /// Wall-clock time from the first submission until all requests completed.
    pub elapsed: Duration,
}

/// Issues sampled requests at a configured rate through a bounded worker pool.
#[derive(Debug)]
pub struct Dispatcher {
    sampler: TargetSampler<Url>,
    recorder: Arc<Recorder>,
    config: DispatchConfig,
    interval: Duration,
    state: watch::Sender<RunState>,
}

impl Dispatcher {
    /// Creates a dispatcher, validating the configuration before any request is issued.
    pub fn new(
        sampler: TargetSampler<Url>,
        recorder: Recorder,
        config: DispatchConfig,
    ) -> Result<Self> {
        if config.total_requests == 0 {
            return Err(Error::InvalidConfig(
                "total requests must be greater than zero".into(),
            ));
        }
        if config.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency limit must be greater than zero".into(),
            ));
        }
        // Validated in both modes, steady pacing derives its ticks from it.
        let interval = submission_interval(config.rate)?;
        if matches!(config.pacing, Pacing::Burst { window } if window.is_zero()) {
            return Err(Error::InvalidConfig(
                "burst window must be greater than zero".into(),
            ));
        }

        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            sampler,
            recorder: Arc::new(recorder),
            config,
            interval,
            state,
        })
    }

    /// Returns a receiver observing the state of this dispatcher.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// The validated run configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs all requests to completion, appending every record to `sink`.
    ///
    /// Individual request failures are recorded, never returned. Errors only occur if the
    /// collector task itself fails.
    pub async fn run<S: RecordSink>(mut self, sink: S) -> Result<RunOutput<S>> {
        let total = self.config.total_requests;
        let (tx, rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect(rx, sink, total));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut workers = JoinSet::new();
        let mut pacer = Pacer::new(&self.config, self.interval);

        tracing::info!(
            total,
            rate = self.config.rate,
            concurrency = self.config.concurrency,
            pacing = ?self.config.pacing,
            "starting run"
        );
        self.state.send_replace(RunState::Running);
        let start = Instant::now();

        for _ in 0..total {
            pacer.ready().await;

            let url = self.sampler.next_target().clone();
            // Blocks while the pool is saturated. The semaphore is never closed.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let recorder = Arc::clone(&self.recorder);
            let tx = tx.clone();
            workers.spawn(async move {
                let record = recorder.measure(&url).await;
                drop(permit);
                // The collector outlives all workers.
                tx.send(record).ok();
            });

            while let Some(result) = workers.try_join_next() {
                log_worker_result(result);
            }
        }

        self.state.send_replace(RunState::Draining);
        tracing::debug!(in_flight = workers.len(), "all requests submitted, draining");
        drop(tx);

        while let Some(result) = workers.join_next().await {
            log_worker_result(result);
        }
        let (records, sink) = collector.await?;
        let elapsed = start.elapsed();

        self.state.send_replace(RunState::Done);
        tracing::info!(
            completed = records.len(),
            elapsed = ?elapsed,
            "run finished"
        );

        Ok(RunOutput {
            records,
            sink,
            elapsed,
        })
    }
}

fn log_worker_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = &err as &dyn std::error::Error, "request worker failed");
    }
}

/// Spaces submissions according to a [`Pacing`] mode.
#[derive(Debug)]
enum Pacer {
    Steady(Interval),
    Burst {
        window: Duration,
        batch: usize,
        submitted: usize,
    },
}

impl Pacer {
    fn new(config: &DispatchConfig, interval: Duration) -> Self {
        match config.pacing {
            Pacing::Steady => {
                let mut ticker = tokio::time::interval(interval);
                // A submission delayed by backpressure shifts the schedule rather than causing a
                // burst of catch-up submissions.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Pacer::Steady(ticker)
            }
            Pacing::Burst { window } => {
                let batch = (config.rate * window.as_secs_f64()).round().max(1.0) as usize;
                Pacer::Burst {
                    window,
                    batch,
                    submitted: 0,
                }
            }
        }
    }

    /// Waits until the next submission is due. The first submission is due immediately.
    async fn ready(&mut self) {
        match self {
            Pacer::Steady(ticker) => {
                ticker.tick().await;
            }
            Pacer::Burst {
                window,
                batch,
                submitted,
            } => {
                if *submitted == *batch {
                    tokio::time::sleep(*window).await;
                    *submitted = 0;
                }
                *submitted += 1;
            }
        }
    }
}

/// Receives records until all workers are done, logging and persisting each one.
async fn collect<S: RecordSink>(
    mut rx: mpsc::UnboundedReceiver<RequestRecord>,
    mut sink: S,
    capacity: usize,
) -> (Vec<RequestRecord>, S) {
    let mut records = Vec::with_capacity(capacity);

    while let Some(record) = rx.recv().await {
        if record.is_success() {
            tracing::info!(
                url = %record.url,
                status = %record.status,
                rtt_ms = record.rtt_ms,
                content_size = record.content_size,
                throughput = record.throughput,
                "request completed"
            );
        } else {
            tracing::warn!(
                url = %record.url,
                status = %record.status,
                rtt_ms = record.rtt_ms,
                "request failed"
            );
        }

        if let Err(err) = write_blocking(|| sink.append(&record)) {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                url = %record.url,
                "failed to write record to log"
            );
        }

        records.push(record);
    }

    (records, sink)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::aggregate::Summary;
    use crate::fetch::{Fetch, FetchError, FetchErrorKind, Fetched};
    use crate::resources::ResourceGraph;

    /// A fetch stub that takes `delay` per request and tracks concurrency.
    #[derive(Debug)]
    struct CountingFetch {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingFetch {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Fetch for CountingFetch {
        async fn fetch(&self, url: &Url) -> Result<Fetched, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if url.path() == "/down" {
                return Err(FetchError::new(FetchErrorKind::Connect, "refused"));
            }
            Ok(Fetched::new(
                200,
                Some("text/plain".into()),
                Bytes::from_static(b"0123456789"),
            ))
        }
    }

    /// Collects rows in memory, optionally failing or blocking on every write.
    #[derive(Debug, Default, Clone)]
    struct MemorySink {
        rows: Arc<Mutex<Vec<String>>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordSink for MemorySink {
        fn append(&mut self, record: &RequestRecord) -> Result<()> {
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(std::io::Error::other("disk full").into());
            }
            self.rows.lock().unwrap().push(record.url.to_string());
            Ok(())
        }

        fn append_summary(&mut self, _summary: &Summary) -> Result<()> {
            Ok(())
        }
    }

    fn dispatcher(
        targets: &[&str],
        fetch: Arc<CountingFetch>,
        config: DispatchConfig,
    ) -> Result<Dispatcher> {
        let targets = targets.iter().map(|t| Url::parse(t).unwrap()).collect();
        let sampler = TargetSampler::builder(targets)
            .zipf(0.0, 1.0)
            .seed(5)
            .build()?;
        let recorder = Recorder::new(ResourceGraph::new(fetch));
        Dispatcher::new(sampler, recorder, config)
    }

    #[tokio::test(start_paused = true)]
    async fn respects_concurrency_limit() {
        let fetch = CountingFetch::new(Duration::from_millis(50));
        let config = DispatchConfig {
            total_requests: 5,
            rate: 1000.0,
            concurrency: 2,
            pacing: Pacing::Steady,
        };
        let dispatcher = dispatcher(&["http://a.test/", "http://b.test/"], fetch.clone(), config)
            .unwrap();

        let sink = MemorySink::default();
        let output = dispatcher.run(sink.clone()).await.unwrap();

        assert_eq!(output.records.len(), 5);
        assert_eq!(sink.rows.lock().unwrap().len(), 5);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 5);
        assert_eq!(fetch.max_in_flight.load(Ordering::SeqCst), 2);
        assert!(output.records.iter().all(|r| r.content_size == 10));
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_do_not_wait_for_completion() {
        let fetch = CountingFetch::new(Duration::from_secs(10));
        let config = DispatchConfig {
            total_requests: 5,
            rate: 10.0,
            concurrency: 10,
            pacing: Pacing::Steady,
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch.clone(), config).unwrap();

        let output = dispatcher.run(MemorySink::default()).await.unwrap();

        // Five submissions 100ms apart, each taking 10s, all overlapping.
        assert_eq!(fetch.max_in_flight.load(Ordering::SeqCst), 5);
        assert!(output.elapsed >= Duration::from_millis(10_400));
        assert!(output.elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_pacing_spaces_submissions() {
        let fetch = CountingFetch::new(Duration::ZERO);
        let config = DispatchConfig {
            total_requests: 4,
            rate: 2.0,
            concurrency: 4,
            pacing: Pacing::Steady,
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch, config).unwrap();

        let output = dispatcher.run(MemorySink::default()).await.unwrap();

        // Submissions at 0s, 0.5s, 1s and 1.5s.
        assert!(output.elapsed >= Duration::from_millis(1500));
        assert!(output.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_pacing_submits_batches() {
        let fetch = CountingFetch::new(Duration::ZERO);
        let config = DispatchConfig {
            total_requests: 5,
            rate: 2.0,
            concurrency: 10,
            pacing: Pacing::Burst {
                window: Duration::from_secs(1),
            },
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch.clone(), config).unwrap();

        let output = dispatcher.run(MemorySink::default()).await.unwrap();

        // Batches of two at 0s, 1s and 2s.
        assert_eq!(output.records.len(), 5);
        assert!(output.elapsed >= Duration::from_secs(2));
        assert!(output.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_become_records() {
        let fetch = CountingFetch::new(Duration::from_millis(1));
        let config = DispatchConfig {
            total_requests: 3,
            rate: 100.0,
            ..Default::default()
        };
        let dispatcher = dispatcher(&["http://a.test/down"], fetch, config).unwrap();

        let output = dispatcher.run(MemorySink::default()).await.unwrap();

        assert_eq!(output.records.len(), 3);
        assert!(output.records.iter().all(|r| !r.is_success()));
        assert!(output.records.iter().all(|r| r.content_size == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_do_not_abort() {
        let fetch = CountingFetch::new(Duration::from_millis(1));
        let config = DispatchConfig {
            total_requests: 3,
            rate: 100.0,
            ..Default::default()
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch, config).unwrap();

        let sink = MemorySink {
            fail: true,
            ..Default::default()
        };
        let output = dispatcher.run(sink).await.unwrap();
        assert_eq!(output.records.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_sink_on_multi_thread_runtime() {
        let fetch = CountingFetch::new(Duration::from_millis(1));
        let config = DispatchConfig {
            total_requests: 6,
            rate: 1000.0,
            concurrency: 3,
            pacing: Pacing::Steady,
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch, config).unwrap();

        let sink = MemorySink {
            delay: Duration::from_millis(5),
            ..Default::default()
        };
        let output = dispatcher.run(sink.clone()).await.unwrap();

        assert_eq!(output.records.len(), 6);
        assert_eq!(sink.rows.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_state_transitions() {
        let fetch = CountingFetch::new(Duration::from_millis(1));
        let config = DispatchConfig {
            total_requests: 1,
            ..Default::default()
        };
        let dispatcher = dispatcher(&["http://a.test/"], fetch, config).unwrap();

        let state = dispatcher.subscribe();
        assert_eq!(*state.borrow(), RunState::Idle);

        dispatcher.run(MemorySink::default()).await.unwrap();
        assert_eq!(*state.borrow(), RunState::Done);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let invalid = [
            DispatchConfig {
                total_requests: 0,
                ..Default::default()
            },
            DispatchConfig {
                concurrency: 0,
                ..Default::default()
            },
            DispatchConfig {
                rate: 0.0,
                ..Default::default()
            },
            DispatchConfig {
                rate: -3.0,
                ..Default::default()
            },
            DispatchConfig {
                rate: f64::NAN,
                ..Default::default()
            },
            DispatchConfig {
                rate: f64::INFINITY,
                ..Default::default()
            },
            DispatchConfig {
                pacing: Pacing::Burst {
                    window: Duration::ZERO,
                },
                ..Default::default()
            },
        ];

        for config in invalid {
            let fetch = CountingFetch::new(Duration::ZERO);
            assert!(
                dispatcher(&["http://a.test/"], fetch, config.clone()).is_err(),
                "{config:?}"
            );
        }
    }

    #[test]
    fn submission_interval_bounds() {
        assert_eq!(submission_interval(4.0).unwrap(), Duration::from_millis(250));
        assert!(matches!(submission_interval(0.0), Err(Error::InvalidRate(_))));
        // Too fast to be represented as a non-zero interval.
        assert!(submission_interval(1e300).is_err());
        // Too slow to be represented at all.
        assert!(submission_interval(1e-300).is_err());
    }
}
