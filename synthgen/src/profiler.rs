//! Continuous profiler session and labelled execution.
//!
//! A [`Profiler`] attaches labels to whatever samples are taken on the calling
//! thread while the labels are pushed. [`tag_wrapper`] scopes a closure under a
//! label set. The live implementation, [`Pyroscope`], is an explicitly owned
//! session: it is started once, shared by reference for the life of the
//! process and shut down by its owner. Nothing here is a global.

use std::{
    cell::RefCell,
    fmt::{self, Display},
    sync::Mutex,
};

use pyroscope::{PyroscopeAgent, pyroscope::PyroscopeAgentRunning};
use pyroscope_pprofrs::{PprofConfig, pprof_backend};
use tracing::{info, warn};

use crate::config::ProfilerConfig;

/// Errors produced by [`Profiler`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`pyroscope::PyroscopeError`].
    #[error("Pyroscope agent error: {0}")]
    Agent(#[from] pyroscope::PyroscopeError),
    /// The agent lock was poisoned by a panicking holder.
    #[error("Profiler session lock poisoned")]
    Poisoned,
    /// Labels were pushed after the session was shut down.
    #[error("Profiler session already stopped")]
    Stopped,
}

/// An ordered label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    /// Build a label set from `(key, value)` pairs, preserving order.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    /// Set one label, replacing any existing value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set one label in place. A new key is appended, an existing key keeps
    /// its position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    /// Whether the set holds no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate labels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// Attaches labels to profiling samples taken on the calling thread.
pub trait Profiler: Send + Sync + fmt::Debug {
    /// Attach `labels` to the calling thread.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn push_labels(&self, labels: &Labels) -> Result<(), Error>;

    /// Detach `labels` from the calling thread.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn pop_labels(&self, labels: &Labels) -> Result<(), Error>;
}

thread_local! {
    static ACTIVE: RefCell<Labels> = RefCell::new(Labels::default());
}

/// The labels enclosing [`tag_wrapper`] calls have attached to the calling
/// thread, one value per key.
///
/// A new thread starts with none. Work handed to another thread carries this
/// set along to stay attributed to its caller.
#[must_use]
pub fn current_labels() -> Labels {
    ACTIVE.with(|active| active.borrow().clone())
}

/// Run `f` with `labels` attached to the calling thread.
///
/// Labels nest: a key already attached by an enclosing call is overridden for
/// the duration of `f`, so the thread never carries two values for one key,
/// and restored afterwards. Labels are detached when `f` returns or unwinds.
/// Failing to attach or detach is logged and otherwise ignored; the work runs
/// regardless.
pub fn tag_wrapper<P, F, R>(profiler: &P, labels: &Labels, f: F) -> R
where
    P: Profiler + ?Sized,
    F: FnOnce() -> R,
{
    let _guard = LabelGuard::push(profiler, labels);
    f()
}

struct LabelGuard<'a, P: Profiler + ?Sized> {
    profiler: &'a P,
    /// The thread's labels before this guard, restored on drop.
    previous: Labels,
    /// Labels this guard attached.
    added: Option<Labels>,
    /// Enclosing labels this guard detached to make room.
    shadowed: Option<Labels>,
}

impl<'a, P: Profiler + ?Sized> LabelGuard<'a, P> {
    fn push(profiler: &'a P, labels: &Labels) -> Self {
        let previous = current_labels();
        let mut next = previous.clone();
        let mut added = Labels::default();
        let mut shadowed = Labels::default();
        for (k, v) in labels.iter() {
            match previous.get(k) {
                Some(old) if old == v => continue,
                Some(old) => shadowed.set(k, old),
                None => {}
            }
            added.set(k, v);
            next.set(k, v);
        }

        let shadowed = detach(profiler, shadowed);
        let added = attach(profiler, added);
        ACTIVE.with(|active| *active.borrow_mut() = next);

        Self {
            profiler,
            previous,
            added,
            shadowed,
        }
    }
}

impl<P: Profiler + ?Sized> Drop for LabelGuard<'_, P> {
    fn drop(&mut self) {
        if let Some(added) = self.added.take() {
            detach(self.profiler, added);
        }
        if let Some(shadowed) = self.shadowed.take() {
            attach(self.profiler, shadowed);
        }
        let previous = std::mem::take(&mut self.previous);
        ACTIVE.with(|active| *active.borrow_mut() = previous);
    }
}

/// Push `labels`, returning them if they are now attached.
fn attach<P: Profiler + ?Sized>(profiler: &P, labels: Labels) -> Option<Labels> {
    if labels.is_empty() {
        return None;
    }
    match profiler.push_labels(&labels) {
        Ok(()) => Some(labels),
        Err(err) => {
            warn!("Failed to attach profiling labels {labels}: {err}");
            None
        }
    }
}

/// Pop `labels`, returning them if they are now detached.
fn detach<P: Profiler + ?Sized>(profiler: &P, labels: Labels) -> Option<Labels> {
    if labels.is_empty() {
        return None;
    }
    match profiler.pop_labels(&labels) {
        Ok(()) => Some(labels),
        Err(err) => {
            warn!("Failed to detach profiling labels {labels}: {err}");
            None
        }
    }
}

/// A profiler that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl Profiler for Disabled {
    fn push_labels(&self, _labels: &Labels) -> Result<(), Error> {
        Ok(())
    }

    fn pop_labels(&self, _labels: &Labels) -> Result<(), Error> {
        Ok(())
    }
}

/// A running Pyroscope agent with a pprof-rs sampling backend.
pub struct Pyroscope {
    agent: Mutex<Option<PyroscopeAgent<PyroscopeAgentRunning>>>,
}

impl fmt::Debug for Pyroscope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pyroscope").finish_non_exhaustive()
    }
}

impl Pyroscope {
    /// Start a profiling session reporting to `config.server_address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be built or started.
    pub fn start(config: &ProfilerConfig) -> Result<Self, Error> {
        let backend = pprof_backend(PprofConfig::new().sample_rate(config.sample_rate));
        let tags: Vec<(&str, &str)> = config
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let agent = PyroscopeAgent::builder(
            config.server_address.as_str(),
            config.application_name.as_str(),
        )
        .backend(backend)
        .tags(tags)
        .build()?;
        let running = agent.start()?;
        info!(
            "Profiling {app} into {server}",
            app = config.application_name,
            server = config.server_address
        );

        Ok(Self {
            agent: Mutex::new(Some(running)),
        })
    }

    /// Stop sampling and flush the final report.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent fails to stop cleanly.
    pub fn shutdown(self) -> Result<(), Error> {
        let agent = self.agent.into_inner().map_err(|_| Error::Poisoned)?;
        if let Some(running) = agent {
            running.stop()?.shutdown();
            info!("Profiler stopped");
        }
        Ok(())
    }

    fn with_agent<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&PyroscopeAgent<PyroscopeAgentRunning>) -> Result<(), Error>,
    {
        let guard = self.agent.lock().map_err(|_| Error::Poisoned)?;
        let agent = guard.as_ref().ok_or(Error::Stopped)?;
        f(agent)
    }
}

impl Profiler for Pyroscope {
    fn push_labels(&self, labels: &Labels) -> Result<(), Error> {
        self.with_agent(|agent| {
            let (add_tag, _) = agent.tag_wrapper();
            for (k, v) in labels.iter() {
                add_tag(k.to_string(), v.to_string())?;
            }
            Ok(())
        })
    }

    fn pop_labels(&self, labels: &Labels) -> Result<(), Error> {
        self.with_agent(|agent| {
            let (_, remove_tag) = agent.tag_wrapper();
            for (k, v) in labels.iter() {
                remove_tag(k.to_string(), v.to_string())?;
            }
            Ok(())
        })
    }
}
