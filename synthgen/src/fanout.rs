//! Bounded fan-out over worker threads.
//!
//! A [`TaskGroup`] spawns independent workers inside a
//! [`std::thread::scope`] and offers a single blocking [`TaskGroup::join`].
//! Workers share no mutable state; each allocates its own data. There is no
//! timeout: a worker that never finishes holds the join forever.

use std::{
    io,
    thread::{self, Scope, ScopedJoinHandle},
};

use tracing::{debug, error};

use crate::{
    profiler::{self, Profiler, tag_wrapper},
    workload::{self, Intensity},
};

/// Errors produced by [`TaskGroup`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The operating system refused to start a worker thread.
    #[error("Failed to spawn worker {name}: {source}")]
    Spawn {
        /// Worker name
        name: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// One or more workers panicked. Reported only after every worker has
    /// been joined.
    #[error("Workers panicked: {names:?}")]
    WorkerPanicked {
        /// Names of the panicked workers
        names: Vec<String>,
    },
}

/// A group of scoped worker threads joined through one barrier.
#[derive(Debug)]
pub struct TaskGroup<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    workers: Vec<(String, ScopedJoinHandle<'scope, ()>)>,
}

impl<'scope, 'env> TaskGroup<'scope, 'env> {
    /// Create an empty group spawning into `scope`.
    #[must_use]
    pub fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        Self {
            scope,
            workers: Vec::new(),
        }
    }

    /// Start a named worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the thread cannot be created. Workers
    /// already started are still joined when the enclosing scope ends.
    pub fn spawn<F>(&mut self, name: impl Into<String>, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'scope,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn_scoped(self.scope, f)
            .map_err(|source| Error::Spawn {
                name: name.clone(),
                source,
            })?;
        self.workers.push((name, handle));
        Ok(())
    }

    /// Number of workers started so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no worker has been started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Block until every worker has finished, returning how many ran.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] naming every worker that panicked.
    pub fn join(self) -> Result<usize, Error> {
        let total = self.workers.len();
        let mut panicked = Vec::new();
        for (name, handle) in self.workers {
            if handle.join().is_err() {
                error!("Worker {name} panicked");
                panicked.push(name);
            }
        }
        if !panicked.is_empty() {
            return Err(Error::WorkerPanicked { names: panicked });
        }
        debug!("Joined {total} workers");
        Ok(total)
    }
}

/// Run `workers` concurrent workers and wait for all of them.
///
/// Worker `i` runs a CPU loop, an allocation burst or string processing by
/// `i % 3`. Each worker carries the caller's labels plus `worker=worker-i`.
///
/// # Errors
///
/// See [`TaskGroup::spawn`] and [`TaskGroup::join`].
pub fn concurrent<P>(profiler: &P, workers: usize, intensity: &Intensity) -> Result<usize, Error>
where
    P: Profiler + ?Sized,
{
    let parent = profiler::current_labels();
    thread::scope(|scope| {
        let mut group = TaskGroup::new(scope);
        for id in 0..workers {
            let name = format!("worker-{id}");
            let labels = parent.clone().with("worker", name.as_str());
            group.spawn(name, move || {
                tag_wrapper(profiler, &labels, || match id % 3 {
                    0 => {
                        workload::cpu_intensive(intensity.worker_iterations);
                    }
                    1 => {
                        workload::memory_intensive(intensity.worker_memory);
                    }
                    _ => {
                        workload::string_processing(intensity.worker_string);
                    }
                });
            })?;
        }
        group.join()
    })
}
