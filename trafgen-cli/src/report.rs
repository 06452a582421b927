//! Human-readable output of the CLI commands.

use std::path::Path;

use bytesize::ByteSize;
use trafgen_engine::RunStats;
use url::Url;
use yansi::Paint;

pub fn print_stats(stats: &RunStats, log_path: &Path) {
    println!();
    print!(
        "{} ({} requests",
        "## RUN".bold(),
        stats.requests().bold()
    );
    if stats.failures > 0 {
        print!(", {}", format!("{} FAILURES", stats.failures).bold().red());
    }
    println!(")");

    println!(
        "  {:.2} requests/s over {:.2?}",
        stats.requests_per_second().bold(),
        stats.duration
    );
    println!(
        "  transferred {}, {:.2}/s",
        ByteSize::b(stats.total_bytes).bold(),
        ByteSize::b((stats.run_throughput() * 1000.0) as u64)
    );

    let summary = &stats.summary;
    println!();
    println!("{}", "## PER REQUEST".bold());
    println!(
        "  rtt avg: {:.2} ms; throughput avg: {:.2} bytes/ms",
        summary.average.rtt_ms.bold(),
        summary.average.throughput.bold()
    );
    println!(
        "  rtt total: {:.2} ms; throughput total: {:.2} bytes/ms",
        summary.total.rtt_ms, summary.total.throughput
    );

    if let (Some(p50), Some(p90), Some(p99)) = (
        stats.rtt_quantile(0.5),
        stats.rtt_quantile(0.9),
        stats.rtt_quantile(0.99),
    ) {
        println!("  rtt p50: {p50:.2} ms; p90: {p90:.2} ms; p99: {p99:.2} ms");
    }

    println!();
    println!("log written to {}", log_path.display().blue());
}

pub fn print_weights(targets: &[Url], mass: &[f64]) {
    println!(
        "{:>6}  {:>10}  {}",
        "RANK".bold(),
        "P".bold(),
        "URL".bold()
    );
    for (rank, (target, p)) in targets.iter().zip(mass).enumerate() {
        println!("{:>6}  {:>10.6}  {}", rank + 1, p, target);
    }
}
