//! The profiled workload generator.
//!
//! Every iteration runs one [`Kind`] from the catalog, chosen by the iteration
//! counter, under `phase=main`. Every `heavy_every` iterations a burst follows
//! under `phase=heavy`. A short pause separates iterations.
//!
//! Workloads run on a blocking thread so that profiler labels, which are
//! attached per OS thread, stay with the work they describe.
//!
//! ## Metrics
//!
//! `workloads_executed`: Iterations run, labelled by `function`
//! `heavy_bursts`: Heavy bursts run
//!

use std::{num::NonZeroU64, sync::Arc};

use metrics::counter;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use synthgen_interval::{Clock, Interval, RealClock, Scheduler};
use tracing::{debug, info};

use super::seeded_rng;
use crate::{
    fanout,
    profiler::{Labels, Profiler, tag_wrapper},
    workload::{Intensity, Kind, heavy_burst},
};

fn default_pause() -> synthgen_interval::Config {
    synthgen_interval::Config::Fixed { millis: 10 }
}

fn default_heavy_every() -> NonZeroU64 {
    NonZeroU64::new(20).unwrap_or(NonZeroU64::MIN)
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of this generator.
pub struct Config {
    /// Pause between iterations
    #[serde(default = "default_pause")]
    pub pause: synthgen_interval::Config,
    /// Run a heavy burst on every iteration divisible by this
    #[serde(default = "default_heavy_every")]
    pub heavy_every: NonZeroU64,
    /// Sizes of the catalog workloads
    #[serde(default)]
    pub intensity: Intensity,
    /// Stop after this many iterations. Runs until shutdown if absent.
    #[serde(default)]
    pub maximum_iterations: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pause: default_pause(),
            heavy_every: default_heavy_every(),
            intensity: Intensity::default(),
            maximum_iterations: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`WorkloadGenerator`].
pub enum Error {
    /// Invalid pause configuration.
    #[error("Interval configuration error: {0}")]
    Interval(#[from] synthgen_interval::Error),
    /// A concurrent workload failed.
    #[error("Fan-out error: {0}")]
    Fanout(#[from] fanout::Error),
    /// The blocking task running an iteration panicked or was cancelled.
    #[error("Workload task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The profiled workload generator.
pub struct WorkloadGenerator<C = RealClock> {
    scheduler: Scheduler<SmallRng, C>,
    profiler: Arc<dyn Profiler>,
    intensity: Intensity,
    heavy_every: NonZeroU64,
    maximum_iterations: Option<u64>,
    shutdown: synthgen_signal::Watcher,
}

impl<C: std::fmt::Debug> std::fmt::Debug for WorkloadGenerator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadGenerator")
            .field("scheduler", &self.scheduler)
            .field("profiler", &self.profiler)
            .field("intensity", &self.intensity)
            .field("heavy_every", &self.heavy_every)
            .field("maximum_iterations", &self.maximum_iterations)
            .finish_non_exhaustive()
    }
}

impl WorkloadGenerator<RealClock> {
    /// Create a new [`WorkloadGenerator`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if the pause configuration is invalid.
    pub fn new(
        config: &Config,
        profiler: Arc<dyn Profiler>,
        shutdown: synthgen_signal::Watcher,
    ) -> Result<Self, Error> {
        Self::with_clock(config, profiler, RealClock, shutdown)
    }
}

impl<C> WorkloadGenerator<C>
where
    C: Clock + Send + Sync,
{
    /// Create a new [`WorkloadGenerator`] pausing against `clock`.
    ///
    /// # Errors
    ///
    /// Creation will fail if the pause configuration is invalid.
    pub fn with_clock(
        config: &Config,
        profiler: Arc<dyn Profiler>,
        clock: C,
        shutdown: synthgen_signal::Watcher,
    ) -> Result<Self, Error> {
        let interval = Interval::new(config.pause)?;
        Ok(Self {
            scheduler: Scheduler::with_clock(interval, seeded_rng(None), clock),
            profiler,
            intensity: config.intensity,
            heavy_every: config.heavy_every,
            maximum_iterations: config.maximum_iterations,
            shutdown,
        })
    }

    /// Run [`WorkloadGenerator`] until shutdown, the iteration budget is spent
    /// or a workload fails. Returns the number of iterations run.
    ///
    /// The iteration counter starts at 1. An iteration in progress is always
    /// finished before shutdown is observed.
    ///
    /// # Errors
    ///
    /// Returns an error if a concurrent workload cannot spawn its workers or
    /// one of them panics.
    pub async fn spin(mut self) -> Result<u64, Error> {
        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);

        let mut iteration: u64 = 0;
        loop {
            if self.maximum_iterations.is_some_and(|max| iteration >= max) {
                info!("ran {iteration} iterations, iteration budget spent");
                return Ok(iteration);
            }
            iteration += 1;

            let kind = Kind::for_iteration(iteration);
            let heavy = iteration % self.heavy_every.get() == 0;
            let profiler = Arc::clone(&self.profiler);
            let intensity = self.intensity;
            tokio::task::spawn_blocking(move || {
                run_iteration(profiler.as_ref(), kind, heavy, &intensity)
            })
            .await??;

            counter!("workloads_executed", "function" => kind.name()).increment(1);
            if heavy {
                counter!("heavy_bursts").increment(1);
            }
            debug!("iteration {iteration}: {kind} (heavy: {heavy})", kind = kind.name());

            tokio::select! {
                _ = self.scheduler.wait() => {},
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(iteration);
                },
            }
        }
    }
}

fn run_iteration(
    profiler: &dyn Profiler,
    kind: Kind,
    heavy: bool,
    intensity: &Intensity,
) -> Result<(), fanout::Error> {
    tag_wrapper(profiler, &Labels::from_pairs(&[("phase", "main")]), || {
        kind.execute(profiler, intensity)?;
        if heavy {
            heavy_burst(profiler, intensity);
        }
        Ok(())
    })
}
