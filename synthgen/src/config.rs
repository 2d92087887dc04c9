//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
//!
//! Both binaries read the same YAML document. Every field has a default, so an
//! absent document means "behave like the stock demo".

use std::{
    collections::BTreeMap,
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::generator;

/// Environment variable holding a complete YAML configuration. Takes
/// precedence over any configuration path.
pub const CONFIG_ENV: &str = "SYNTHGEN_CONFIG";
/// Environment variable overriding [`ProfilerConfig::server_address`].
pub const SERVER_ADDRESS_ENV: &str = "PYROSCOPE_SERVER_ADDRESS";

const DEFAULT_SERVER_ADDRESS: &str = "http://localhost:4040";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Configuration for `log-generator`
    #[serde(default)]
    pub log_generator: generator::log::Config,
    /// Configuration for `workload-generator`
    #[serde(default)]
    pub workload_generator: generator::workload::Config,
    /// The profiling session used by `workload-generator`
    #[serde(default)]
    pub profiler: ProfilerConfig,
    /// The method by which to expose internal telemetry, if any
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

/// Defines the manner of exposing generator telemetry.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum Telemetry {
    /// Serve a Prometheus scrape endpoint.
    Prometheus {
        /// Address to bind the exporter to
        addr: SocketAddr,
    },
}

fn default_application_name() -> String {
    "sample_app".to_string()
}

fn default_server_address() -> String {
    DEFAULT_SERVER_ADDRESS.to_string()
}

fn default_sample_rate() -> u32 {
    100
}

fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("env".to_string(), "demo".to_string()),
        ("version".to_string(), "2.0".to_string()),
    ])
}

/// Configuration of the continuous profiling session.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub struct ProfilerConfig {
    /// Application name profiles are reported under
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Address of the profiling server. Overridden by
    /// `PYROSCOPE_SERVER_ADDRESS` when that is set and non-empty.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Samples per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Static tags attached to every profile
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            server_address: default_server_address(),
            sample_rate: default_sample_rate(),
            tags: default_tags(),
        }
    }
}

impl ProfilerConfig {
    /// Apply an override for the server address. Empty overrides are ignored.
    #[must_use]
    pub fn with_server_address(mut self, address: Option<String>) -> Self {
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            self.server_address = address;
        }
        self
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Sources, in order of precedence: the `SYNTHGEN_CONFIG` environment
    /// variable, the file at `path`, built-in defaults. The profiler server
    /// address is then overridden from `PYROSCOPE_SERVER_ADDRESS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen source cannot be read or is not valid.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = if let Ok(contents) = env::var(CONFIG_ENV) {
            debug!("Using config from env var '{CONFIG_ENV}'");
            Self::parse(&contents)?
        } else if let Some(path) = path {
            debug!("Attempting to open configuration file at: {}", path.display());
            let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
                path: path.to_path_buf(),
                source: Box::new(source),
            })?;
            Self::parse(&contents)?
        } else {
            debug!("No configuration supplied, using defaults");
            Self::default()
        };

        config.profiler = config
            .profiler
            .with_server_address(env::var(SERVER_ADDRESS_ENV).ok());
        Ok(config)
    }

    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not a valid configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
