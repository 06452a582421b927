//! Durable, append-only log of request records.
//!
//! The log has a fixed column layout:
//!
//! ```text
//! URL, Start Time, End Time, RTT (ms), Status Code, Content Size (bytes), Throughput (bytes/ms)
//! ```
//!
//! It is truncated and re-initialized with this header when created, receives one row per
//! completed request, and two trailing `Total` and `Average` rows at the end of a run.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::aggregate::{Summary, Totals};
use crate::error::Result;
use crate::measure::RequestRecord;

/// Column names of the log, in order.
pub const HEADER: [&str; 7] = [
    "URL",
    "Start Time",
    "End Time",
    "RTT (ms)",
    "Status Code",
    "Content Size (bytes)",
    "Throughput (bytes/ms)",
];

/// Receives every completed record and the final summary of a run.
///
/// A sink is owned by a single writer for the duration of a run, so implementations do not need
/// to synchronize internally.
pub trait RecordSink: Send + 'static {
    /// Appends one completed request.
    fn append(&mut self, record: &RequestRecord) -> Result<()>;

    /// Appends the `Total` and `Average` rows.
    fn append_summary(&mut self, summary: &Summary) -> Result<()>;
}

/// Runs a blocking sink write from within an async task.
///
/// On the multi-threaded runtime the worker hands off its other tasks before blocking. The
/// current-thread runtime cannot do that, so the write runs inline there.
pub(crate) fn write_blocking<R>(write: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(write),
        _ => write(),
    }
}

/// Field separator of the log file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Comma-separated values.
    #[default]
    Csv,
    /// Tab-separated values.
    Tsv,
}

impl Format {
    fn delimiter(self) -> u8 {
        match self {
            Format::Csv => b',',
            Format::Tsv => b'\t',
        }
    }
}

/// A [`RecordSink`] writing to a CSV or TSV file.
///
/// Every row is flushed as soon as it is written.
#[derive(Debug)]
pub struct FileSink<W: Write = File> {
    writer: csv::Writer<W>,
}

impl FileSink<File> {
    /// Creates or truncates the file at `path` and writes the header row.
    pub fn create(path: &Path, format: Format) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file, format)
    }
}

impl<W: Write> FileSink<W> {
    /// Writes the header row to `writer` and returns a sink appending to it.
    pub fn new(writer: W, format: Format) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(format.delimiter())
            .from_writer(writer);
        writer.write_record(HEADER)?;
        writer.flush()?;

        Ok(Self { writer })
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| err.into_error().into())
    }

    fn write_row(&mut self, row: [String; 7]) -> Result<()> {
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    fn summary_row(label: &str, totals: &Totals) -> [String; 7] {
        [
            label.to_owned(),
            String::new(),
            String::new(),
            totals.rtt_ms.to_string(),
            String::new(),
            String::new(),
            totals.throughput.to_string(),
        ]
    }
}

impl<W: Write + Send + 'static> RecordSink for FileSink<W> {
    fn append(&mut self, record: &RequestRecord) -> Result<()> {
        self.write_row([
            record.url.to_string(),
            format_time(record.start_time),
            format_time(record.end_time),
            record.rtt_ms.to_string(),
            record.status.to_string(),
            record.content_size.to_string(),
            record.throughput.to_string(),
        ])
    }

    fn append_summary(&mut self, summary: &Summary) -> Result<()> {
        self.write_row(Self::summary_row("Total", &summary.total))?;
        self.write_row(Self::summary_row("Average", &summary.average))
    }
}

fn format_time(time: SystemTime) -> String {
    humantime::format_rfc3339_micros(time).to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::aggregate::aggregate;
    use crate::measure::Status;

    fn record(status: Status) -> RequestRecord {
        let start_time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        RequestRecord {
            url: Url::parse("http://example.com/a?b=c,d").unwrap(),
            start_time,
            end_time: start_time + Duration::from_millis(250),
            rtt_ms: 250.0,
            content_size: 500,
            throughput: 2.0,
            status,
        }
    }

    fn written(sink: FileSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn writes_header_rows_and_summary() {
        let mut sink = FileSink::new(Vec::new(), Format::Csv).unwrap();
        let records = [record(Status::Code(200)), record(Status::Code(404))];
        for record in &records {
            sink.append(record).unwrap();
        }
        sink.append_summary(&aggregate(&records)).unwrap();

        let output = written(sink);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines,
            [
                "URL,Start Time,End Time,RTT (ms),Status Code,Content Size (bytes),Throughput (bytes/ms)",
                "\"http://example.com/a?b=c,d\",2023-11-14T22:13:20.000000Z,2023-11-14T22:13:20.250000Z,250,200,500,2",
                "\"http://example.com/a?b=c,d\",2023-11-14T22:13:20.000000Z,2023-11-14T22:13:20.250000Z,250,404,500,2",
                "Total,,,500,,,4",
                "Average,,,250,,,2",
            ]
        );
    }

    #[test]
    fn tab_separated_failure_row() {
        let mut sink = FileSink::new(Vec::new(), Format::Tsv).unwrap();
        sink.append(&record(Status::Failed("connect error: refused".into())))
            .unwrap();

        let output = written(sink);
        let row: Vec<_> = output.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(row.len(), HEADER.len());
        assert_eq!(row[4], "Failed: connect error: refused");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "stale contents\nfrom a previous run\n").unwrap();

        let mut sink = FileSink::create(&path, Format::Csv).unwrap();
        sink.append_summary(&Summary::default()).unwrap();
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("URL,"));
        assert!(!contents.contains("stale"));
        assert!(contents.ends_with("Total,,,0,,,0\nAverage,,,0,,,0\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_in_place_on_multi_thread_runtime() {
        let mut sink = FileSink::new(Vec::new(), Format::Csv).unwrap();
        write_blocking(|| sink.append(&record(Status::Code(200)))).unwrap();
        assert_eq!(written(sink).lines().count(), 2);
    }

    #[tokio::test]
    async fn writes_inline_on_current_thread_runtime() {
        let mut sink = FileSink::new(Vec::new(), Format::Csv).unwrap();
        write_blocking(|| sink.append(&record(Status::Code(200)))).unwrap();
        assert_eq!(written(sink).lines().count(), 2);
    }
}
