//! Interval scheduler
//!
//! Pairs an [`Interval`] with a [`Clock`] and a source of randomness. Each
//! call to [`Scheduler::wait`] draws a fresh delay and suspends for it. Delays
//! are measured from the moment `wait` is called, so time spent by the caller
//! between waits never shortens or lengthens the next one.

use rand::Rng;
use tokio::time::Duration;

use crate::{Clock, Interval, RealClock};

#[derive(Debug)]
/// Waits out one randomized delay per iteration.
pub struct Scheduler<R, C = RealClock> {
    interval: Interval,
    rng: R,
    clock: C,
}

impl<R> Scheduler<R, RealClock>
where
    R: Rng + Send,
{
    /// Create a new [`Scheduler`] that sleeps in real time.
    #[must_use]
    pub fn new(interval: Interval, rng: R) -> Self {
        Self::with_clock(interval, rng, RealClock)
    }
}

impl<R, C> Scheduler<R, C>
where
    R: Rng + Send,
    C: Clock + Send + Sync,
{
    /// Create a new [`Scheduler`] against an arbitrary clock.
    #[must_use]
    pub fn with_clock(interval: Interval, rng: R, clock: C) -> Self {
        Self {
            interval,
            rng,
            clock,
        }
    }

    /// The interval delays are drawn from.
    #[must_use]
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Draw the next delay and suspend for it, returning the delay.
    ///
    /// Dropping the returned future part way through cancels the wait; the
    /// next call draws a new delay.
    pub async fn wait(&mut self) -> Duration {
        let delay = self.interval.next_delay(&mut self.rng);
        self.clock.wait(delay).await;
        delay
    }
}
