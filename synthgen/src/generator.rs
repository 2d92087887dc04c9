//! synthgen generators
//!
//! A generator is a single sequential loop: wait a scheduled interval, build
//! one emission, dispatch it, repeat. Iterations never overlap; an emission
//! is finished, successfully or fatally, before the next wait starts. Each
//! generator takes a [`synthgen_signal::Watcher`] and returns cleanly once the
//! signal fires or its iteration budget is spent.

use rand::{SeedableRng, rngs::SmallRng};

pub mod log;
pub mod workload;

/// The rng every generator draws from: seeded when a seed is configured,
/// from the OS otherwise.
pub(crate) fn seeded_rng(seed: Option<u64>) -> SmallRng {
    seed.map_or_else(SmallRng::from_os_rng, SmallRng::seed_from_u64)
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by the generators.
pub enum Error {
    /// See [`crate::generator::log::Error`] for details.
    #[error(transparent)]
    Log(#[from] log::Error),
    /// See [`crate::generator::workload::Error`] for details.
    #[error(transparent)]
    Workload(#[from] workload::Error),
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::seeded_rng;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = seeded_rng(Some(42));
        let mut b = seeded_rng(Some(42));
        let xs: Vec<u64> = (0..16).map(|_| a.random()).collect();
        let ys: Vec<u64> = (0..16).map(|_| b.random()).collect();
        assert_eq!(xs, ys);

        let mut c = seeded_rng(Some(43));
        let zs: Vec<u64> = (0..16).map(|_| c.random()).collect();
        assert_ne!(xs, zs);
    }
}
