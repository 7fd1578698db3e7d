//! Synthetic access patterns for driving the controller end to end.

use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::address::Ppn;
use crate::config::FlashGeometry;
use crate::error::Error;

mod runner;
pub use runner::{WorkloadReport, run_workload};

/// Order in which a workload touches pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Workload {
    /// Pages `0..n`. Consecutive pages share a channel, so batches pile up.
    Sequential,
    /// `n` distinct pages drawn uniformly from the device.
    Random,
    /// Round-robin over channels, so every batch spreads evenly.
    Striped,
}

impl Workload {
    /// The pages this workload touches, in issue order. `pages` must not
    /// exceed the device size.
    pub fn pages(self, geometry: &FlashGeometry, pages: usize, seed: u64) -> Vec<Ppn> {
        match self {
            Workload::Sequential => (0..pages).collect(),
            Workload::Random => {
                let mut rng = SmallRng::seed_from_u64(seed);
                rand::seq::index::sample(&mut rng, geometry.n_pages_per_dev, pages).into_vec()
            }
            Workload::Striped => (0..pages)
                .map(|i| {
                    let channel = i % geometry.n_channels_per_dev;
                    let offset = i / geometry.n_channels_per_dev;
                    channel * geometry.n_pages_per_channel + offset
                })
                .collect(),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Workload::Sequential => "sequential",
            Workload::Random => "random",
            Workload::Striped => "striped",
        })
    }
}

impl FromStr for Workload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Workload::Sequential),
            "random" | "rand" => Ok(Workload::Random),
            "striped" | "stripe" => Ok(Workload::Striped),
            _ => Err(Error::UnknownWorkload(s.to_string())),
        }
    }
}

/// Tag attached to every backend operation a workload issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Write,
    Read,
    Erase,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Write => "Write",
            Phase::Read => "Read",
            Phase::Erase => "Erase",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::FlashConfig;

    #[test]
    fn striped_pages_rotate_over_channels() {
        let geometry = FlashConfig::default().geometry().unwrap();
        let pages = Workload::Striped.pages(&geometry, 20, 0);
        let channels: Vec<_> = pages.iter().map(|p| p / geometry.n_pages_per_channel).collect();
        assert_eq!(&channels[..16], &(0..16).collect::<Vec<_>>()[..]);
        assert_eq!(&channels[16..], &[0usize, 1, 2, 3]);
        assert_eq!(pages[16], 1);
    }

    #[test]
    fn random_pages_are_distinct_and_seeded() {
        let geometry = FlashConfig::default().geometry().unwrap();
        let a = Workload::Random.pages(&geometry, 500, 9);
        let b = Workload::Random.pages(&geometry, 500, 9);
        assert_eq!(a, b);
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 500);
        assert!(a.iter().all(|&p| p < geometry.n_pages_per_dev));
    }

    #[test]
    fn workload_names_parse() {
        assert_eq!("Striped".parse::<Workload>().unwrap(), Workload::Striped);
        assert_eq!("seq".parse::<Workload>().unwrap(), Workload::Sequential);
        assert!("zipf".parse::<Workload>().is_err());
    }
}
