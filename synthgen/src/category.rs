//! Category tables and the sampler that draws from them.
//!
//! A [`CategorySet`] is a fixed, non-empty list of candidate values for one
//! label dimension. Values may repeat: a value listed three times is drawn
//! three times as often as one listed once. Tables are `const` and checked for
//! emptiness at compile time.

use rand::Rng;

/// A fixed candidate list for one label dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySet {
    name: &'static str,
    values: &'static [&'static str],
}

impl CategorySet {
    /// Create a new [`CategorySet`].
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty. In a `const` context this is a compile
    /// error.
    #[must_use]
    pub const fn new(name: &'static str, values: &'static [&'static str]) -> Self {
        assert!(!values.is_empty(), "category table must not be empty");
        Self { name, values }
    }

    /// The dimension this table feeds, for example `severity`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Every entry of the table, repeats included.
    #[must_use]
    pub fn values(&self) -> &'static [&'static str] {
        self.values
    }

    /// Number of entries, repeats included. Never zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false, see [`CategorySet::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Draw one entry uniformly at random.
    pub fn sample<R>(&self, rng: &mut R) -> &'static str
    where
        R: Rng + ?Sized,
    {
        // Non-empty by construction, see `CategorySet::new`.
        self.values[rng.random_range(0..self.values.len())]
    }

    /// The probability that [`CategorySet::sample`] yields `value`.
    #[must_use]
    pub fn weight(&self, value: &str) -> f64 {
        let hits = self.values.iter().filter(|v| **v == value).count();
        hits as f64 / self.values.len() as f64
    }
}

/// Host names attached as `host_name`.
pub const HOST_NAMES: CategorySet = CategorySet::new(
    "host_name",
    &[
        "zeus",
        "cassandra",
        "hercules",
        "oracle",
        "athena",
        "jupiter",
        "poseidon",
        "hades",
        "artemis",
        "apollo",
        "demeter",
        "dionysus",
        "hephaestus",
        "hermes",
        "hestia",
        "iris",
        "nemesis",
        "pan",
        "persephone",
        "prometheus",
        "selen",
    ],
);

/// Service names attached as `service_name`. The generic "service" is
/// over-represented.
pub const SERVICE_NAMES: CategorySet = CategorySet::new(
    "service_name",
    &[
        "frontend",
        "backend",
        "database",
        "cache",
        "queue",
        "monitoring",
        "loadbalancer",
        "proxy",
        "storage",
        "auth",
        "api",
        "web",
        "worker",
        "scheduler",
        "cron",
        "admin",
        "service",
        "gateway",
        "service",
        "service",
        "service",
    ],
);

/// Log sources attached as `source`.
pub const SOURCES: CategorySet = CategorySet::new(
    "source",
    &[
        "kubernetes",
        "ubuntu",
        "debian",
        "centos",
        "redhat",
        "fedora",
        "arch",
        "gentoo",
        "alpine",
        "suse",
        "rhel",
        "coreos",
        "docker",
        "rancher",
        "vmware",
        "xen",
        "hyperv",
        "openstack",
        "aws",
        "gcp",
        "azure",
        "digitalocean",
    ],
);

/// Severities attached as `severity`, weighted towards "info".
pub const SEVERITIES: CategorySet = CategorySet::new(
    "severity",
    &[
        "info", "info", "info", "info", "info", "info", "warning", "error", "critical", "debug",
        "debug", "debug",
    ],
);

/// Message bodies. Sent verbatim, never interpolated.
pub const MESSAGES: CategorySet = CategorySet::new(
    "message",
    &[
        "User logged in",
        "User logged out",
        "User created",
        "User deleted",
        "User updated",
        "User password changed",
        "User password reset",
        "User password reset requested",
        "User password reset failed",
    ],
);

/// One value drawn per log dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Drawn from [`SEVERITIES`]
    pub severity: &'static str,
    /// Drawn from [`SOURCES`]
    pub source: &'static str,
    /// Drawn from [`SERVICE_NAMES`]
    pub service_name: &'static str,
    /// Drawn from [`HOST_NAMES`]
    pub host_name: &'static str,
    /// Drawn from [`MESSAGES`]
    pub message: &'static str,
}

/// The full set of tables a log record is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tables {
    /// See [`SEVERITIES`]
    pub severity: CategorySet,
    /// See [`SOURCES`]
    pub source: CategorySet,
    /// See [`SERVICE_NAMES`]
    pub service_name: CategorySet,
    /// See [`HOST_NAMES`]
    pub host_name: CategorySet,
    /// See [`MESSAGES`]
    pub message: CategorySet,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            severity: SEVERITIES,
            source: SOURCES,
            service_name: SERVICE_NAMES,
            host_name: HOST_NAMES,
            message: MESSAGES,
        }
    }
}

impl Tables {
    /// Draw one value from every table.
    pub fn draw<R>(&self, rng: &mut R) -> Sample
    where
        R: Rng + ?Sized,
    {
        Sample {
            severity: self.severity.sample(rng),
            source: self.source.sample(rng),
            service_name: self.service_name.sample(rng),
            host_name: self.host_name.sample(rng),
            message: self.message.sample(rng),
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};
    use std::collections::BTreeMap;

    use super::*;

    fn count(draws: &[&'static str]) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for d in draws {
            *counts.entry(*d).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn table_sizes() {
        assert_eq!(HOST_NAMES.len(), 21);
        assert_eq!(SERVICE_NAMES.len(), 21);
        assert_eq!(SOURCES.len(), 22);
        assert_eq!(SEVERITIES.len(), 12);
        assert_eq!(MESSAGES.len(), 9);
    }

    #[test]
    fn repeats_act_as_weights() {
        assert!((SEVERITIES.weight("info") - 0.5).abs() < f64::EPSILON);
        assert!((SEVERITIES.weight("debug") - 0.25).abs() < f64::EPSILON);
        assert!((SERVICE_NAMES.weight("service") - 4.0 / 21.0).abs() < f64::EPSILON);
        assert!(SEVERITIES.weight("fatal").abs() < f64::EPSILON);
    }

    #[test]
    fn frequencies_converge_to_weights() {
        const DRAWS: usize = 120_000;
        let mut rng = SmallRng::seed_from_u64(0xdead_beef);

        for table in [SEVERITIES, SERVICE_NAMES, MESSAGES] {
            let draws: Vec<_> = (0..DRAWS).map(|_| table.sample(&mut rng)).collect();
            for (value, hits) in count(&draws) {
                let observed = hits as f64 / DRAWS as f64;
                let expected = table.weight(value);
                assert!(
                    (observed - expected).abs() < 0.01,
                    "{}: {value} observed {observed}, expected {expected}",
                    table.name()
                );
            }
        }
    }

    proptest! {
        #[test]
        fn draws_stay_in_table(seed: u64, draws in 1..512usize) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let tables = Tables::default();
            for _ in 0..draws {
                let sample = tables.draw(&mut rng);
                prop_assert!(SEVERITIES.values().contains(&sample.severity));
                prop_assert!(SOURCES.values().contains(&sample.source));
                prop_assert!(SERVICE_NAMES.values().contains(&sample.service_name));
                prop_assert!(HOST_NAMES.values().contains(&sample.host_name));
                prop_assert!(MESSAGES.values().contains(&sample.message));
            }
        }
    }
}
