//! Randomized emission intervals
//!
//! Every synthgen generator waits between iterations. The wait is either a
//! fixed pause or a delay drawn uniformly from a closed interval, re-drawn for
//! every iteration. This crate holds the interval model, the `Clock` the wait
//! happens against and a [`scheduler::Scheduler`] tying the two together.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration};

pub mod scheduler;

pub use scheduler::Scheduler;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of an [`Interval`].
pub enum Config {
    /// Wait the same number of milliseconds every iteration.
    Fixed {
        /// The pause, in milliseconds.
        millis: u64,
    },
    /// Wait a number of milliseconds drawn uniformly from
    /// `[minimum_millis, maximum_millis]` every iteration.
    Uniform {
        /// Lower bound, inclusive.
        minimum_millis: u64,
        /// Upper bound, inclusive.
        maximum_millis: u64,
    },
}

/// Errors produced by [`Interval`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The lower bound of a uniform interval is above its upper bound.
    #[error("interval minimum {minimum}ms is greater than maximum {maximum}ms")]
    Inverted {
        /// Configured lower bound
        minimum: u64,
        /// Configured upper bound
        maximum: u64,
    },
}

/// A validated delay distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    minimum: Duration,
    maximum: Duration,
}

impl Interval {
    /// Create a new [`Interval`] from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inverted`] if a uniform interval's minimum exceeds its
    /// maximum.
    pub fn new(config: Config) -> Result<Self, Error> {
        match config {
            Config::Fixed { millis } => Ok(Self::fixed(Duration::from_millis(millis))),
            Config::Uniform {
                minimum_millis,
                maximum_millis,
            } => {
                if minimum_millis > maximum_millis {
                    return Err(Error::Inverted {
                        minimum: minimum_millis,
                        maximum: maximum_millis,
                    });
                }
                Ok(Self {
                    minimum: Duration::from_millis(minimum_millis),
                    maximum: Duration::from_millis(maximum_millis),
                })
            }
        }
    }

    /// An interval that always yields `delay`.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            minimum: delay,
            maximum: delay,
        }
    }

    /// Lower bound of this interval.
    #[must_use]
    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    /// Upper bound of this interval.
    #[must_use]
    pub fn maximum(&self) -> Duration {
        self.maximum
    }

    /// Draw the next delay. Every call is an independent draw.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_delay<R>(&self, rng: &mut R) -> Duration
    where
        R: Rng + ?Sized,
    {
        if self.minimum == self.maximum {
            return self.minimum;
        }
        // Both bounds came from u64 milliseconds, or are equal.
        let low = self.minimum.as_millis() as u64;
        let high = self.maximum.as_millis() as u64;
        Duration::from_millis(rng.random_range(low..=high))
    }
}

#[async_trait]
/// The `Clock` an interval is waited out against.
pub trait Clock {
    /// Suspend the caller for `delay`.
    async fn wait(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that sleeps in real time.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn wait(&self, delay: Duration) {
        time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};
    use tokio::time::Duration;

    use crate::{Config, Error, Interval};

    #[test]
    fn inverted_bounds_rejected() {
        let res = Interval::new(Config::Uniform {
            minimum_millis: 3000,
            maximum_millis: 1000,
        });
        assert_eq!(
            res,
            Err(Error::Inverted {
                minimum: 3000,
                maximum: 1000
            })
        );
    }

    #[test]
    fn fixed_interval_is_constant() {
        let interval = Interval::new(Config::Fixed { millis: 10 }).expect("valid config");
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(interval.next_delay(&mut rng), Duration::from_millis(10));
        }
    }

    #[test]
    fn uniform_interval_is_resampled() {
        let interval = Interval::new(Config::Uniform {
            minimum_millis: 1000,
            maximum_millis: 3000,
        })
        .expect("valid config");
        let mut rng = SmallRng::seed_from_u64(7);
        let first = interval.next_delay(&mut rng);
        let differs = (0..100).any(|_| interval.next_delay(&mut rng) != first);
        assert!(differs, "every draw returned {first:?}");
    }

    proptest! {
        #[test]
        fn delay_never_leaves_bounds(
            seed: u64,
            minimum_millis in 0..10_000u64,
            width in 0..10_000u64,
        ) {
            let maximum_millis = minimum_millis + width;
            let interval = Interval::new(Config::Uniform { minimum_millis, maximum_millis })
                .expect("valid config");
            let mut rng = SmallRng::seed_from_u64(seed);
            for _ in 0..64 {
                let delay = interval.next_delay(&mut rng);
                prop_assert!(delay >= Duration::from_millis(minimum_millis));
                prop_assert!(delay <= Duration::from_millis(maximum_millis));
            }
        }
    }
}
