//! Run-level statistics over completed [`RequestRecord`]s.

use std::fmt;
use std::time::Duration;

use sketches_ddsketch::DDSketch;

use crate::measure::{MIN_RTT_MS, RequestRecord, rtt_ms};

/// The aggregated RTT and throughput fields of a summary row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Totals {
    /// Round-trip time in milliseconds.
    pub rtt_ms: f64,
    /// Throughput in bytes per millisecond.
    pub throughput: f64,
}

/// The `Total` and `Average` rows appended to the log at the end of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Summary {
    /// Number of aggregated records.
    pub count: usize,
    /// Sum of RTT and throughput over all records.
    pub total: Totals,
    /// Arithmetic mean of RTT and throughput over all records.
    pub average: Totals,
}

/// Sums and averages RTT and throughput over `records`.
///
/// The result does not depend on the order of `records`. An empty slice yields all zeros.
pub fn aggregate(records: &[RequestRecord]) -> Summary {
    if records.is_empty() {
        return Summary::default();
    }

    let count = records.len();
    let total = Totals {
        rtt_ms: ordered_sum(records.iter().map(|r| r.rtt_ms)),
        throughput: ordered_sum(records.iter().map(|r| r.throughput)),
    };
    let average = Totals {
        rtt_ms: total.rtt_ms / count as f64,
        throughput: total.throughput / count as f64,
    };

    Summary {
        count,
        total,
        average,
    }
}

/// Sums floats in ascending order, so completion order never changes the rounding.
fn ordered_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    values.sort_unstable_by(f64::total_cmp);
    values.into_iter().sum()
}

/// Everything reported about a finished run.
pub struct RunStats {
    /// The `Total` and `Average` rows.
    pub summary: Summary,
    /// Number of records whose primary document failed.
    pub failures: usize,
    /// Sum of content sizes over all records.
    pub total_bytes: u64,
    /// Wall-clock duration of the whole run, from first submission to drain.
    pub duration: Duration,
    /// Distribution of RTTs in milliseconds.
    pub rtt: DDSketch,
}

impl RunStats {
    /// Computes run statistics from all records of a run.
    pub fn from_records(records: &[RequestRecord], duration: Duration) -> Self {
        let mut rtt = DDSketch::default();
        let mut failures = 0;
        let mut total_bytes = 0;

        for record in records {
            rtt.add(record.rtt_ms);
            total_bytes += record.content_size;
            if !record.is_success() {
                failures += 1;
            }
        }

        Self {
            summary: aggregate(records),
            failures,
            total_bytes,
            duration,
            rtt,
        }
    }

    /// Number of aggregated requests.
    pub fn requests(&self) -> usize {
        self.summary.count
    }

    /// Total bytes divided by the wall-clock duration of the run, in bytes per millisecond.
    ///
    /// Unlike the per-record average, this accounts for requests overlapping in time.
    pub fn run_throughput(&self) -> f64 {
        self.total_bytes as f64 / rtt_ms(self.duration)
    }

    /// Offered requests per second over the whole run.
    pub fn requests_per_second(&self) -> f64 {
        self.requests() as f64 / (rtt_ms(self.duration) / 1000.0)
    }

    /// Returns the RTT at quantile `q` in milliseconds, or `None` without records.
    pub fn rtt_quantile(&self, q: f64) -> Option<f64> {
        self.rtt
            .quantile(q)
            .ok()
            .flatten()
            .map(|rtt| rtt.max(MIN_RTT_MS))
    }
}

impl fmt::Debug for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStats")
            .field("summary", &self.summary)
            .field("failures", &self.failures)
            .field("total_bytes", &self.total_bytes)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use url::Url;

    use super::*;
    use crate::measure::Status;

    fn record(rtt_ms: f64, content_size: u64, status: Status) -> RequestRecord {
        let throughput = match status {
            Status::Code(_) => content_size as f64 / rtt_ms,
            Status::Failed(_) => 0.0,
        };
        RequestRecord {
            url: Url::parse("http://example.com/").unwrap(),
            start_time: SystemTime::UNIX_EPOCH,
            end_time: SystemTime::UNIX_EPOCH,
            rtt_ms,
            status,
            content_size,
            throughput,
        }
    }

    fn sample_records() -> Vec<RequestRecord> {
        vec![
            record(100.0, 1000, Status::Code(200)),
            record(3.7, 12_345, Status::Code(200)),
            record(250.5, 0, Status::Failed("timeout".into())),
            record(1.0, 17, Status::Code(404)),
            record(0.1 + 0.2, 999, Status::Code(200)),
        ]
    }

    #[test]
    fn empty_input_is_zero() {
        let summary = aggregate(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.total, Totals::default());
        assert_eq!(summary.average, Totals::default());
    }

    #[test]
    fn sums_and_averages() {
        let records = vec![
            record(100.0, 1000, Status::Code(200)),
            record(300.0, 3000, Status::Code(200)),
        ];
        let summary = aggregate(&records);

        assert_eq!(summary.count, 2);
        assert_eq!(summary.total.rtt_ms, 400.0);
        assert_eq!(summary.total.throughput, 20.0);
        assert_eq!(summary.average.rtt_ms, 200.0);
        assert_eq!(summary.average.throughput, 10.0);
    }

    #[test]
    fn order_independent() {
        let records = sample_records();
        let expected = aggregate(&records);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed), expected);

        let mut rotated = records;
        rotated.rotate_left(2);
        assert_eq!(aggregate(&rotated), expected);
    }

    #[test]
    fn run_stats_count_failures_and_bytes() {
        let stats = RunStats::from_records(&sample_records(), Duration::from_secs(2));

        assert_eq!(stats.requests(), 5);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.total_bytes, 1000 + 12_345 + 17 + 999);
        assert_eq!(stats.run_throughput(), stats.total_bytes as f64 / 2000.0);
        assert_eq!(stats.requests_per_second(), 2.5);

        let p50 = stats.rtt_quantile(0.5).unwrap();
        assert!((3.0..=5.0).contains(&p50), "p50 was {p50}");
    }

    #[test]
    fn run_stats_without_records() {
        let stats = RunStats::from_records(&[], Duration::ZERO);

        assert_eq!(stats.requests(), 0);
        assert_eq!(stats.run_throughput(), 0.0);
        assert_eq!(stats.rtt_quantile(0.99), None);
    }
}
