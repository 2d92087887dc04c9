//! `log-generator`: push randomly assembled log lines into Loki.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use http::Uri;
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use synthgen::{
    config::{self, Config, Telemetry},
    generator::{self, log::LogGenerator},
    sink::HttpSink,
};
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load synthgen config: {0}")]
    Config(#[from] config::Error),
    #[error("Log generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// Loki push endpoint, overrides the configuration file
    #[clap(long)]
    target_uri: Option<Uri>,
    /// stop after this many records
    #[clap(long)]
    maximum_iterations: Option<u64>,
    /// seed for every random choice, makes a run reproducible
    #[clap(long)]
    seed: Option<u64>,
    /// address to expose prometheus metrics on
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

fn get_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = Config::load(cli.config_path.as_deref())?;
    let log = &mut config.log_generator;
    if let Some(uri) = &cli.target_uri {
        log.target_uri = uri.clone();
    }
    if cli.maximum_iterations.is_some() {
        log.maximum_iterations = cli.maximum_iterations;
    }
    if cli.seed.is_some() {
        log.seed = cli.seed;
    }
    if let Some(addr) = cli.prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus { addr });
    }
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus { addr }) = config.telemetry {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Serving prometheus metrics on {addr}");
    }

    let (shutdown_watcher, shutdown_broadcast) = synthgen_signal::signal();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(err) => error!("Unable to listen for ctrl-c: {err}"),
        }
        shutdown_broadcast.signal();
    });

    let log_config = config.log_generator;
    info!(
        "Pushing records to {uri} as job {job}",
        uri = log_config.target_uri,
        job = log_config.job
    );
    let sink = HttpSink::new(log_config.target_uri.clone());
    let generator = LogGenerator::new(&log_config, sink, shutdown_watcher)
        .map_err(generator::Error::from)?;
    let emitted = generator
        .spin()
        .await
        .inspect_err(|err| error!("Log generator shut down unexpectedly: {err}"))
        .map_err(generator::Error::from)?;
    info!("Emitted {emitted} records");
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting log-generator {version}.");

    let cli = Cli::parse();
    let config = get_config(&cli)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_configuration() {
        let cli = Cli::parse_from([
            "log-generator",
            "--target-uri",
            "http://localhost:3100/loki/api/v1/push",
            "--maximum-iterations",
            "3",
            "--seed",
            "7",
            "--prometheus-addr",
            "127.0.0.1:9000",
        ]);
        let config = get_config(&cli).expect("config failed to load");

        assert_eq!(
            config.log_generator.target_uri,
            Uri::from_static("http://localhost:3100/loki/api/v1/push")
        );
        assert_eq!(config.log_generator.maximum_iterations, Some(3));
        assert_eq!(config.log_generator.seed, Some(7));
        assert_eq!(
            config.telemetry,
            Some(Telemetry::Prometheus {
                addr: "127.0.0.1:9000".parse().expect("valid addr")
            })
        );
    }

    #[test]
    fn unreadable_config_path_is_an_error() {
        let cli = Cli::parse_from([
            "log-generator",
            "--config-path",
            "/nonexistent/synthgen.yaml",
        ]);
        assert!(matches!(get_config(&cli), Err(Error::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_endpoint_fails_the_run() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("could not bind");
        let addr = listener.local_addr().expect("no local addr");
        drop(listener);

        let mut config = Config::default();
        config.log_generator.target_uri = format!("http://{addr}/loki/api/v1/push")
            .parse()
            .expect("valid uri");
        config.log_generator.interval = synthgen_interval::Config::Fixed { millis: 1 };

        let res = inner_main(config).await;
        assert!(matches!(res, Err(Error::Generator(_))));
    }
}
