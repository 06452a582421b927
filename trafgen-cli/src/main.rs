//! The `trafgen` command line tool.
//!
//! Loads targets and settings, runs the traffic engine and prints a report of the run.
#![warn(missing_debug_implementations)]

mod cli;
mod config;
mod observability;
mod report;

fn main() -> anyhow::Result<()> {
    cli::execute()
}
