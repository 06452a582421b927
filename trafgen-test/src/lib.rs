//! Test utilities for the traffic generator.
//!
//! This crate provides utilities to facilitate testing of the engine and the CLI against real
//! HTTP servers. See the modules for all available utilities.

pub mod server;
pub mod tracing;
