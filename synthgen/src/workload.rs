//! The workload catalog.
//!
//! Each entry is a distinct computational shape meant to show up as its own
//! tower in a flame graph: numeric loops, deep recursion, allocation bursts,
//! string building with a JSON round trip, sorting (including a quadratic sort
//! for contrast), simulated request latency and a concurrent fan-out.
//!
//! Every body is `#[inline(never)]` and routes its result through
//! [`black_box`] so the optimizer cannot discard the work and the sampling
//! profiler attributes time to the named function. The inefficient choices
//! here, naive Fibonacci and bubble sort, are the point.

use std::{fmt::Write as _, hint::black_box, thread, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    fanout,
    profiler::{Labels, Profiler, tag_wrapper},
};

/// Numeric loop of `n` square roots and sines.
#[inline(never)]
pub fn cpu_intensive(n: u64) -> f64 {
    let mut sum = 0.0;
    for i in 0..n {
        let x = i as f64;
        sum += x.sqrt() * x.sin();
    }
    black_box(sum)
}

/// Allocate `size` KiB of random bytes, then rewrite every byte.
#[inline(never)]
#[allow(clippy::cast_possible_truncation)]
pub fn memory_intensive(size: usize) -> usize {
    let mut rng = rand::rng();
    let mut data: Vec<Vec<u8>> = (0..size)
        .map(|_| {
            let mut row = vec![0u8; 1024];
            rng.fill(&mut row[..]);
            row
        })
        .collect();

    for (i, row) in data.iter_mut().enumerate() {
        for (j, byte) in row.iter_mut().enumerate() {
            *byte = ((usize::from(*byte) + i + j) % 256) as u8;
        }
    }
    black_box(&data);
    data.len()
}

/// Naive doubly recursive Fibonacci. Stack depth grows with `n`.
#[inline(never)]
pub fn fibonacci(n: u32) -> u64 {
    if n <= 1 {
        return u64::from(n);
    }
    fibonacci(n - 1) + fibonacci(n - 2)
}

/// Recursive factorial. Wraps on overflow.
#[inline(never)]
pub fn factorial(n: u64) -> u64 {
    if n <= 1 {
        return 1;
    }
    n.wrapping_mul(factorial(n - 1))
}

/// Build a long string, then serialize and parse it back as JSON.
#[inline(never)]
pub fn string_processing(iterations: usize) -> usize {
    let mut builder = String::new();
    for i in 0..iterations {
        // Writing into a String does not fail.
        let _ = write!(builder, "iteration-{i}-");
    }

    let data = json!({
        "message": builder,
        "count": iterations,
        "nested": { "a": 1, "b": 2, "c": 3 },
    });
    let encoded = serde_json::to_vec(&data).unwrap_or_default();
    let decoded: Option<Value> = serde_json::from_slice(&encoded).ok();
    black_box(decoded);
    encoded.len()
}

/// Sort `size` random integers with the standard sort and, for `size` up to
/// 1000, again with [`bubble_sort`].
#[inline(never)]
pub fn sorting(size: usize) -> Vec<i64> {
    let mut rng = rand::rng();
    let data: Vec<i64> = (0..size).map(|_| rng.random_range(0..10_000)).collect();

    let mut sorted = data.clone();
    sorted.sort_unstable();

    if size <= 1000 {
        let mut bubbled = data;
        bubble_sort(&mut bubbled);
        black_box(&bubbled);
    }
    black_box(sorted)
}

/// Quadratic in-place sort.
#[inline(never)]
pub fn bubble_sort(arr: &mut [i64]) {
    let n = arr.len();
    for i in 0..n.saturating_sub(1) {
        for j in 0..n - i - 1 {
            if arr[j] > arr[j + 1] {
                arr.swap(j, j + 1);
            }
        }
    }
}

/// Handle `requests` simulated requests, each preceded by 10 to 59
/// microseconds of latency.
#[inline(never)]
pub fn network_simulation(requests: u64) -> u64 {
    let mut total = 0;
    for i in 0..requests {
        thread::sleep(Duration::from_micros(10 + i % 50));
        total += process_request(i);
    }
    black_box(total)
}

/// Format, split and parse a request identifier.
#[inline(never)]
pub fn process_request(id: u64) -> u64 {
    let request = format!("request-{id}");
    let num = request
        .split('-')
        .nth(1)
        .and_then(|part| part.parse::<u64>().ok())
        .unwrap_or_default();
    black_box(num * 2)
}

fn default_fast_iterations() -> u64 {
    1_000_000
}
fn default_slow_iterations() -> u64 {
    5_000_000
}
fn default_slow_memory() -> usize {
    200
}
fn default_fibonacci() -> u32 {
    35
}
fn default_memory() -> usize {
    1000
}
fn default_string() -> usize {
    50_000
}
fn default_sorting() -> usize {
    5000
}
fn default_network_requests() -> u64 {
    100
}
fn default_factorial() -> u64 {
    15
}
fn default_concurrent_workers() -> usize {
    10
}
fn default_worker_iterations() -> u64 {
    1_000_000
}
fn default_worker_memory() -> usize {
    500
}
fn default_worker_string() -> usize {
    10_000
}
fn default_heavy_iterations() -> u64 {
    10_000_000
}
fn default_heavy_memory() -> usize {
    2000
}

/// How hard each catalog entry works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub struct Intensity {
    /// [`Kind::Fast`] loop iterations
    #[serde(default = "default_fast_iterations")]
    pub fast_iterations: u64,
    /// [`Kind::Slow`] loop iterations
    #[serde(default = "default_slow_iterations")]
    pub slow_iterations: u64,
    /// [`Kind::Slow`] KiB allocated
    #[serde(default = "default_slow_memory")]
    pub slow_memory: usize,
    /// [`Kind::Recursive`] Fibonacci index
    #[serde(default = "default_fibonacci")]
    pub fibonacci: u32,
    /// [`Kind::Memory`] KiB allocated
    #[serde(default = "default_memory")]
    pub memory: usize,
    /// [`Kind::String`] iterations
    #[serde(default = "default_string")]
    pub string: usize,
    /// [`Kind::Sorting`] element count
    #[serde(default = "default_sorting")]
    pub sorting: usize,
    /// [`Kind::Network`] simulated requests
    #[serde(default = "default_network_requests")]
    pub network_requests: u64,
    /// [`Kind::Math`] factorial argument
    #[serde(default = "default_factorial")]
    pub factorial: u64,
    /// [`Kind::Concurrent`] worker count
    #[serde(default = "default_concurrent_workers")]
    pub concurrent_workers: usize,
    /// CPU loop iterations per CPU worker
    #[serde(default = "default_worker_iterations")]
    pub worker_iterations: u64,
    /// KiB allocated per memory worker
    #[serde(default = "default_worker_memory")]
    pub worker_memory: usize,
    /// Iterations per string worker
    #[serde(default = "default_worker_string")]
    pub worker_string: usize,
    /// Heavy burst loop iterations
    #[serde(default = "default_heavy_iterations")]
    pub heavy_iterations: u64,
    /// Heavy burst KiB allocated
    #[serde(default = "default_heavy_memory")]
    pub heavy_memory: usize,
}

impl Default for Intensity {
    fn default() -> Self {
        Self {
            fast_iterations: default_fast_iterations(),
            slow_iterations: default_slow_iterations(),
            slow_memory: default_slow_memory(),
            fibonacci: default_fibonacci(),
            memory: default_memory(),
            string: default_string(),
            sorting: default_sorting(),
            network_requests: default_network_requests(),
            factorial: default_factorial(),
            concurrent_workers: default_concurrent_workers(),
            worker_iterations: default_worker_iterations(),
            worker_memory: default_worker_memory(),
            worker_string: default_worker_string(),
            heavy_iterations: default_heavy_iterations(),
            heavy_memory: default_heavy_memory(),
        }
    }
}

/// A catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Short numeric loop
    Fast,
    /// Long numeric loop followed by allocation
    Slow,
    /// Naive Fibonacci
    Recursive,
    /// Allocation burst
    Memory,
    /// String building and JSON round trip
    String,
    /// Standard and bubble sort
    Sorting,
    /// Simulated request latency
    Network,
    /// Recursive factorial
    Math,
    /// Fan-out over worker threads
    Concurrent,
}

impl Kind {
    /// Every entry, in cycle order.
    pub const ALL: [Kind; 9] = [
        Kind::Fast,
        Kind::Slow,
        Kind::Recursive,
        Kind::Memory,
        Kind::String,
        Kind::Sorting,
        Kind::Network,
        Kind::Math,
        Kind::Concurrent,
    ];

    /// The entry run on `iteration`. Deterministic: cycles the catalog so a
    /// long run covers every entry evenly.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_iteration(iteration: u64) -> Self {
        // The remainder is below 9.
        Self::ALL[(iteration % Self::ALL.len() as u64) as usize]
    }

    /// Value of the `function` label.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Kind::Fast => "fast",
            Kind::Slow => "slow",
            Kind::Recursive => "recursive",
            Kind::Memory => "memory",
            Kind::String => "string",
            Kind::Sorting => "sorting",
            Kind::Network => "network",
            Kind::Math => "math",
            Kind::Concurrent => "concurrent",
        }
    }

    fn shape(self) -> &'static str {
        match self {
            Kind::Fast => "cpu",
            Kind::Slow => "mixed",
            Kind::Recursive => "fibonacci",
            Kind::Memory => "allocation",
            Kind::String => "processing",
            Kind::Sorting => "algorithms",
            Kind::Network => "simulation",
            Kind::Math => "factorial",
            Kind::Concurrent => "threads",
        }
    }

    /// Labels this entry runs under.
    #[must_use]
    pub fn labels(self) -> Labels {
        Labels::from_pairs(&[("function", self.name()), ("type", self.shape())])
    }

    /// Run this entry on the calling thread under its labels.
    ///
    /// # Errors
    ///
    /// Only [`Kind::Concurrent`] can fail, see [`fanout::concurrent`].
    pub fn execute<P>(self, profiler: &P, intensity: &Intensity) -> Result<(), fanout::Error>
    where
        P: Profiler + ?Sized,
    {
        tag_wrapper(profiler, &self.labels(), || {
            match self {
                Kind::Fast => {
                    cpu_intensive(intensity.fast_iterations);
                }
                Kind::Slow => {
                    cpu_intensive(intensity.slow_iterations);
                    memory_intensive(intensity.slow_memory);
                }
                Kind::Recursive => {
                    fibonacci(intensity.fibonacci);
                }
                Kind::Memory => {
                    memory_intensive(intensity.memory);
                }
                Kind::String => {
                    string_processing(intensity.string);
                }
                Kind::Sorting => {
                    sorting(intensity.sorting);
                }
                Kind::Network => {
                    network_simulation(intensity.network_requests);
                }
                Kind::Math => {
                    factorial(intensity.factorial);
                }
                Kind::Concurrent => {
                    fanout::concurrent(profiler, intensity.concurrent_workers, intensity)?;
                }
            }
            Ok(())
        })
    }
}

/// The periodic high-intensity burst, run under `phase=heavy`.
pub fn heavy_burst<P>(profiler: &P, intensity: &Intensity)
where
    P: Profiler + ?Sized,
{
    tag_wrapper(profiler, &Labels::from_pairs(&[("phase", "heavy")]), || {
        cpu_intensive(intensity.heavy_iterations);
        memory_intensive(intensity.heavy_memory);
    });
}
