//! The log line generator.
//!
//! ## Metrics
//!
//! `records_emitted`: Records dispatched, regardless of response status
//!
//! Additional metrics are emitted by this generator's [sink](crate::sink).
//!
//! Any serialization or transport failure ends the loop with an error. There
//! is no retry: the caller is expected to exit.

use http::Uri;
use metrics::counter;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use synthgen_interval::{Clock, Interval, RealClock, Scheduler};
use tracing::{debug, info};

use super::seeded_rng;
use crate::{
    category::Tables,
    record::{self, PushRequest},
    sink::{self, Sink},
};

fn default_target_uri() -> Uri {
    Uri::from_static("http://loki:3100/loki/api/v1/push")
}

fn default_job() -> String {
    "log-generator".to_string()
}

fn default_interval() -> synthgen_interval::Config {
    synthgen_interval::Config::Uniform {
        minimum_millis: 1000,
        maximum_millis: 3000,
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of this generator.
pub struct Config {
    /// The Loki push endpoint, must be a valid URI
    #[serde(with = "http_serde::uri", default = "default_target_uri")]
    pub target_uri: Uri,
    /// Value of the fixed `job` label
    #[serde(default = "default_job")]
    pub job: String,
    /// Delay between records
    #[serde(default = "default_interval")]
    pub interval: synthgen_interval::Config,
    /// The seed for random operations, drawn from the OS if absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Stop after this many records. Runs until shutdown if absent.
    #[serde(default)]
    pub maximum_iterations: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_uri: default_target_uri(),
            job: default_job(),
            interval: default_interval(),
            seed: None,
            maximum_iterations: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`LogGenerator`].
pub enum Error {
    /// Invalid interval configuration.
    #[error("Interval configuration error: {0}")]
    Interval(#[from] synthgen_interval::Error),
    /// Record assembly failed.
    #[error("Record error: {0}")]
    Record(#[from] record::Error),
    /// Record dispatch failed.
    #[error("Sink error: {0}")]
    Sink(#[from] sink::Error),
}

#[derive(Debug)]
/// The log line generator.
///
/// Draws one value per category table, assembles a single-entry push request
/// stamped with the current time and hands it to a [`Sink`].
pub struct LogGenerator<S, C = RealClock> {
    scheduler: Scheduler<SmallRng, C>,
    rng: SmallRng,
    tables: Tables,
    job: String,
    sink: S,
    maximum_iterations: Option<u64>,
    shutdown: synthgen_signal::Watcher,
}

impl<S> LogGenerator<S, RealClock>
where
    S: Sink,
{
    /// Create a new [`LogGenerator`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if the interval configuration is invalid.
    pub fn new(config: &Config, sink: S, shutdown: synthgen_signal::Watcher) -> Result<Self, Error> {
        Self::with_clock(config, sink, RealClock, shutdown)
    }
}

impl<S, C> LogGenerator<S, C>
where
    S: Sink,
    C: Clock + Send + Sync,
{
    /// Create a new [`LogGenerator`] waiting against `clock`.
    ///
    /// # Errors
    ///
    /// Creation will fail if the interval configuration is invalid.
    pub fn with_clock(
        config: &Config,
        sink: S,
        clock: C,
        shutdown: synthgen_signal::Watcher,
    ) -> Result<Self, Error> {
        let interval = Interval::new(config.interval)?;
        let mut rng = seeded_rng(config.seed);
        let scheduler = Scheduler::with_clock(interval, SmallRng::from_rng(&mut rng), clock);

        Ok(Self {
            scheduler,
            rng,
            tables: Tables::default(),
            job: config.job.clone(),
            sink,
            maximum_iterations: config.maximum_iterations,
            shutdown,
        })
    }

    /// Run [`LogGenerator`] until shutdown, the iteration budget is spent or a
    /// record fails. Returns the number of records dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error, and stops immediately, on the first serialization or
    /// transport failure.
    pub async fn spin(mut self) -> Result<u64, Error> {
        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);

        let mut emitted: u64 = 0;
        loop {
            if self.maximum_iterations.is_some_and(|max| emitted >= max) {
                info!("emitted {emitted} records, iteration budget spent");
                return Ok(emitted);
            }

            tokio::select! {
                delay = self.scheduler.wait() => {
                    debug!("waited {delay:?}");
                },
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(emitted);
                },
            }

            let sample = self.tables.draw(&mut self.rng);
            let request = PushRequest::single(&sample, &self.job, record::now_nanos()?);
            let body = request.to_bytes()?;

            let outcome = self.sink.dispatch(body).await?;
            emitted += 1;
            counter!("records_emitted").increment(1);
            debug!(
                "{severity} {host}/{service}: {message} ({status})",
                severity = sample.severity,
                host = sample.host_name,
                service = sample.service_name,
                message = sample.message,
                status = outcome.status,
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::StatusCode;
    use tokio::time::Duration;

    use super::*;
    use crate::{
        category::{HOST_NAMES, MESSAGES, SERVICE_NAMES, SEVERITIES, SOURCES},
        sink::{
            Dispatched, HttpSink,
            test::{closed_uri, serve},
        },
    };

    /// Records requested delays without sleeping.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct InstantClock {
        pub(crate) waits: Arc<Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl Clock for InstantClock {
        async fn wait(&self, delay: Duration) {
            self.waits.lock().expect("poisoned").push(delay);
        }
    }

    /// Counts dispatches, forwarding to `inner` when present and answering
    /// 200 otherwise.
    #[derive(Debug, Default)]
    struct CountingSink {
        attempts: Arc<AtomicUsize>,
        inner: Option<HttpSink>,
    }

    #[async_trait]
    impl Sink for CountingSink {
        async fn dispatch(&self, body: Bytes) -> Result<Dispatched, sink::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match &self.inner {
                Some(inner) => inner.dispatch(body).await,
                None => Ok(Dispatched {
                    status: StatusCode::OK,
                }),
            }
        }
    }

    fn config(maximum_iterations: Option<u64>) -> Config {
        Config {
            seed: Some(42),
            maximum_iterations,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn pushes_one_record_per_iteration() {
        let (uri, received) = serve(StatusCode::NO_CONTENT).await;
        let (watcher, _broadcaster) = synthgen_signal::signal();
        let clock = InstantClock::default();

        let generator = LogGenerator::with_clock(
            &config(Some(5)),
            HttpSink::new(uri),
            clock.clone(),
            watcher,
        )
        .expect("valid config");
        let emitted = generator.spin().await.expect("generator failed");
        assert_eq!(emitted, 5);

        let received = received.lock().expect("poisoned");
        assert_eq!(received.len(), 5);
        for r in received.iter() {
            let request: PushRequest = serde_json::from_slice(&r.body).expect("not a push request");
            assert_eq!(request.streams.len(), 1);
            let stream = &request.streams[0];
            assert_eq!(stream.values.len(), 1);
            assert_eq!(stream.stream.job, "log-generator");
            assert!(SEVERITIES.values().contains(&stream.stream.severity.as_str()));
            assert!(SOURCES.values().contains(&stream.stream.source.as_str()));
            assert!(SERVICE_NAMES.values().contains(&stream.stream.service_name.as_str()));
            assert!(HOST_NAMES.values().contains(&stream.stream.host_name.as_str()));
            assert!(MESSAGES.values().contains(&stream.values[0].1.as_str()));
            assert!(stream.values[0].0.parse::<u128>().is_ok());
        }

        let waits = clock.waits.lock().expect("poisoned");
        assert_eq!(waits.len(), 5);
        assert!(
            waits
                .iter()
                .all(|d| *d >= Duration::from_millis(1000) && *d <= Duration::from_millis(3000))
        );
    }

    #[tokio::test]
    async fn error_status_does_not_stop_the_loop() {
        let (uri, received) = serve(StatusCode::BAD_REQUEST).await;
        let (watcher, _broadcaster) = synthgen_signal::signal();

        let generator = LogGenerator::with_clock(
            &config(Some(3)),
            HttpSink::new(uri),
            InstantClock::default(),
            watcher,
        )
        .expect("valid config");
        assert_eq!(generator.spin().await.expect("generator failed"), 3);
        assert_eq!(received.lock().expect("poisoned").len(), 3);
    }

    #[tokio::test]
    async fn transport_failure_is_fatal() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink {
            attempts: Arc::clone(&attempts),
            inner: Some(HttpSink::new(closed_uri().await)),
        };
        let (watcher, _broadcaster) = synthgen_signal::signal();

        let generator =
            LogGenerator::with_clock(&config(None), sink, InstantClock::default(), watcher)
                .expect("valid config");
        let res = generator.spin().await;

        assert!(matches!(
            res,
            Err(Error::Sink(sink::Error::RequestFailed { .. }))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_wait() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = CountingSink {
            attempts: Arc::clone(&attempts),
            inner: None,
        };
        let (watcher, broadcaster) = synthgen_signal::signal();

        // Real clock, one to three seconds per wait.
        let generator = LogGenerator::new(&config(None), sink, watcher).expect("valid config");
        let handle = tokio::spawn(generator.spin());
        broadcaster.signal_and_wait().await;

        let emitted = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("generator ignored shutdown")
            .expect("generator panicked")
            .expect("generator failed");
        assert_eq!(emitted, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inverted_interval_rejected() {
        let (watcher, _broadcaster) = synthgen_signal::signal();
        let config = Config {
            interval: synthgen_interval::Config::Uniform {
                minimum_millis: 10,
                maximum_millis: 1,
            },
            ..Config::default()
        };
        let res = LogGenerator::with_clock(
            &config,
            CountingSink::default(),
            InstantClock::default(),
            watcher,
        );
        assert!(matches!(res, Err(Error::Interval(_))));
    }
}
