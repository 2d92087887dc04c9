//! `workload-generator`: cycle CPU and memory shaped workloads under a
//! continuous profiler.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use synthgen::{
    config::{self, Config, Telemetry},
    generator::{self, workload::WorkloadGenerator},
    profiler::{self, Disabled, Profiler, Pyroscope},
};
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load synthgen config: {0}")]
    Config(#[from] config::Error),
    #[error("Workload generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Profiler failure: {0}")]
    Profiler(#[from] profiler::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// stop after this many iterations
    #[clap(long)]
    maximum_iterations: Option<u64>,
    /// address to expose prometheus metrics on
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// run the workloads without starting a profiling session
    #[clap(long)]
    no_profiler: bool,
}

fn get_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = Config::load(cli.config_path.as_deref())?;
    if cli.maximum_iterations.is_some() {
        config.workload_generator.maximum_iterations = cli.maximum_iterations;
    }
    if let Some(addr) = cli.prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus { addr });
    }
    Ok(config)
}

fn start_profiler(cli: &Cli, config: &Config) -> Result<Option<Arc<Pyroscope>>, Error> {
    if cli.no_profiler {
        info!("Profiling disabled");
        return Ok(None);
    }
    let session = Pyroscope::start(&config.profiler)
        .inspect_err(|err| error!("Profiler failed to start: {err}"))?;
    Ok(Some(Arc::new(session)))
}

async fn inner_main(config: Config, profiler: Arc<dyn Profiler>) -> Result<(), Error> {
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

    let generator =
        WorkloadGenerator::new(&config.workload_generator, profiler, shutdown_watcher)
            .map_err(generator::Error::from)?;
    let iterations = generator
        .spin()
        .await
        .inspect_err(|err| error!("Workload generator shut down unexpectedly: {err}"))
        .map_err(generator::Error::from)?;
    info!("Ran {iterations} iterations");
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting workload-generator {version}.");

    let cli = Cli::parse();
    let config = get_config(&cli)?;

    let session = start_profiler(&cli, &config)?;
    let profiler: Arc<dyn Profiler> = match &session {
        Some(session) => Arc::clone(session) as Arc<dyn Profiler>,
        None => Arc::new(Disabled),
    };

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, profiler));
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Some(session) = session {
        match Arc::try_unwrap(session) {
            Ok(session) => session.shutdown()?,
            Err(_) => warn!("Profiler still referenced at exit, final report skipped"),
        }
    }
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_configuration() {
        let cli = Cli::parse_from([
            "workload-generator",
            "--maximum-iterations",
            "9",
            "--no-profiler",
        ]);
        assert!(cli.no_profiler);

        let config = get_config(&cli).expect("config failed to load");
        assert_eq!(config.workload_generator.maximum_iterations, Some(9));
        assert_eq!(config.telemetry, None);
    }

    #[test]
    fn no_profiler_skips_the_session() {
        let cli = Cli::parse_from(["workload-generator", "--no-profiler"]);
        let config = get_config(&cli).expect("config failed to load");
        let session = start_profiler(&cli, &config).expect("disabled profiler failed");
        assert!(session.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bounded_run_without_profiler() {
        let mut config = Config::default();
        config.workload_generator.maximum_iterations = Some(3);
        config.workload_generator.intensity.slow_iterations = 1_000;
        config.workload_generator.intensity.slow_memory = 1;
        config.workload_generator.intensity.fibonacci = 10;
        config.workload_generator.intensity.memory = 1;

        inner_main(config, Arc::new(Disabled))
            .await
            .expect("run failed");
    }
}
