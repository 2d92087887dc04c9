//! Synthetic load for observability demos.
//!
//! This library supports the two synthgen binaries. `log-generator` pushes
//! randomly assembled log lines into a Loki-compatible ingest endpoint on a
//! randomized timer. `workload-generator` cycles through a catalog of CPU,
//! memory and latency shaped workloads under a continuous profiler so that the
//! resulting flame graphs have something to show.
//!
//! Both are built from the same parts: category tables sampled at random, a
//! timed emission loop and a thin adapter into an external sink.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod category;
pub mod config;
pub mod fanout;
pub mod generator;
pub mod profiler;
pub mod record;
pub mod sink;
pub mod workload;
