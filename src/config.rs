//! Device configuration and the geometry derived from it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sim::SimDuration;

/// Raw device parameters, as supplied by a configuration file or a driver.
///
/// Every field has a default, so a TOML document only needs to name the
/// values it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashConfig {
    pub page_size: usize,
    pub n_pages_per_block: usize,
    pub n_blocks_per_plane: usize,
    pub n_planes_per_chip: usize,
    pub n_chips_per_package: usize,
    pub n_packages_per_channel: usize,
    pub n_channels_per_dev: usize,
    /// Ticks a channel is busy serving one page read.
    pub read_latency: u64,
    /// Ticks a channel is busy serving one page program.
    pub program_latency: u64,
    /// Ticks a channel is busy serving one block erase.
    pub erase_latency: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            page_size: 2048,
            n_pages_per_block: 64,
            n_blocks_per_plane: 2,
            n_planes_per_chip: 1,
            n_chips_per_package: 1,
            n_packages_per_channel: 1,
            n_channels_per_dev: 16,
            read_latency: 1,
            program_latency: 2,
            erase_latency: 3,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    flash: FlashConfig,
}

impl FlashConfig {
    /// Parse the `[flash]` table of a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.flash)
    }

    /// Validate the counts and derive the full geometry.
    pub fn geometry(&self) -> Result<FlashGeometry> {
        FlashGeometry::new(self)
    }

    pub fn timings(&self) -> ChannelTimings {
        ChannelTimings {
            read: SimDuration::from_ticks(self.read_latency),
            program: SimDuration::from_ticks(self.program_latency),
            erase: SimDuration::from_ticks(self.erase_latency),
        }
    }
}

/// Builder for [`FlashConfig`], starting from the defaults.
#[derive(Clone, Debug, Default)]
pub struct FlashConfigBuilder {
    config: FlashConfig,
}

impl FlashConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.config.page_size = bytes;
        self
    }
    pub fn with_pages_per_block(mut self, n: usize) -> Self {
        self.config.n_pages_per_block = n;
        self
    }
    pub fn with_blocks_per_plane(mut self, n: usize) -> Self {
        self.config.n_blocks_per_plane = n;
        self
    }
    pub fn with_planes_per_chip(mut self, n: usize) -> Self {
        self.config.n_planes_per_chip = n;
        self
    }
    pub fn with_chips_per_package(mut self, n: usize) -> Self {
        self.config.n_chips_per_package = n;
        self
    }
    pub fn with_packages_per_channel(mut self, n: usize) -> Self {
        self.config.n_packages_per_channel = n;
        self
    }
    pub fn with_channels(mut self, n: usize) -> Self {
        self.config.n_channels_per_dev = n;
        self
    }
    /// Set read, program and erase latencies in ticks.
    pub fn with_latencies(mut self, read: u64, program: u64, erase: u64) -> Self {
        self.config.read_latency = read;
        self.config.program_latency = program;
        self.config.erase_latency = erase;
        self
    }
    pub fn build(self) -> FlashConfig {
        self.config
    }
}

/// Fixed per-operation service times of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelTimings {
    pub read: SimDuration,
    pub program: SimDuration,
    pub erase: SimDuration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        FlashConfig::default().timings()
    }
}

/// Validated counts at every hierarchy level plus the page totals derived
/// from them. Read-only once built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashGeometry {
    pub page_size: usize,
    pub n_pages_per_block: usize,
    pub n_blocks_per_plane: usize,
    pub n_planes_per_chip: usize,
    pub n_chips_per_package: usize,
    pub n_packages_per_channel: usize,
    pub n_channels_per_dev: usize,

    pub n_pages_per_plane: usize,
    pub n_pages_per_chip: usize,
    pub n_pages_per_package: usize,
    pub n_pages_per_channel: usize,
    pub n_pages_per_dev: usize,
    pub n_blocks_per_channel: usize,
    pub n_blocks_per_dev: usize,
}

fn non_zero(value: usize, field: &'static str) -> Result<usize> {
    if value == 0 {
        Err(Error::InvalidGeometry { field })
    } else {
        Ok(value)
    }
}

fn mul(a: usize, b: usize, field: &'static str) -> Result<usize> {
    a.checked_mul(b).ok_or(Error::GeometryOverflow { field })
}

impl FlashGeometry {
    pub fn new(config: &FlashConfig) -> Result<Self> {
        let page_size = non_zero(config.page_size, "page_size")?;
        let n_pages_per_block = non_zero(config.n_pages_per_block, "n_pages_per_block")?;
        let n_blocks_per_plane = non_zero(config.n_blocks_per_plane, "n_blocks_per_plane")?;
        let n_planes_per_chip = non_zero(config.n_planes_per_chip, "n_planes_per_chip")?;
        let n_chips_per_package = non_zero(config.n_chips_per_package, "n_chips_per_package")?;
        let n_packages_per_channel =
            non_zero(config.n_packages_per_channel, "n_packages_per_channel")?;
        let n_channels_per_dev = non_zero(config.n_channels_per_dev, "n_channels_per_dev")?;

        let n_pages_per_plane = mul(n_pages_per_block, n_blocks_per_plane, "n_pages_per_plane")?;
        let n_pages_per_chip = mul(n_pages_per_plane, n_planes_per_chip, "n_pages_per_chip")?;
        let n_pages_per_package =
            mul(n_pages_per_chip, n_chips_per_package, "n_pages_per_package")?;
        let n_pages_per_channel =
            mul(n_pages_per_package, n_packages_per_channel, "n_pages_per_channel")?;
        let n_pages_per_dev = mul(n_pages_per_channel, n_channels_per_dev, "n_pages_per_dev")?;
        // Device size in bytes must be representable too.
        mul(n_pages_per_dev, page_size, "page_size")?;

        Ok(Self {
            page_size,
            n_pages_per_block,
            n_blocks_per_plane,
            n_planes_per_chip,
            n_chips_per_package,
            n_packages_per_channel,
            n_channels_per_dev,
            n_pages_per_plane,
            n_pages_per_chip,
            n_pages_per_package,
            n_pages_per_channel,
            n_pages_per_dev,
            n_blocks_per_channel: n_pages_per_channel / n_pages_per_block,
            n_blocks_per_dev: n_pages_per_dev / n_pages_per_block,
        })
    }

    /// Page counts of one unit at each level above the page, most
    /// significant first: channel, package, chip, plane, block.
    pub fn page_hierarchy(&self) -> [usize; 5] {
        [
            self.n_pages_per_channel,
            self.n_pages_per_package,
            self.n_pages_per_chip,
            self.n_pages_per_plane,
            self.n_pages_per_block,
        ]
    }

    /// Device capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.n_pages_per_dev * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_derives_page_counts() {
        let geometry = FlashConfig::default().geometry().unwrap();
        assert_eq!(geometry.n_pages_per_plane, 128);
        assert_eq!(geometry.n_pages_per_channel, 128);
        assert_eq!(geometry.n_pages_per_dev, 2048);
        assert_eq!(geometry.n_blocks_per_channel, 2);
        assert_eq!(geometry.n_blocks_per_dev, 32);
        assert_eq!(geometry.page_hierarchy(), [128, 128, 128, 128, 64]);
        assert_eq!(geometry.capacity(), 2048 * 2048);
    }

    #[test]
    fn zero_counts_are_rejected() {
        let config = FlashConfigBuilder::new().with_planes_per_chip(0).build();
        assert!(matches!(
            config.geometry(),
            Err(Error::InvalidGeometry {
                field: "n_planes_per_chip"
            })
        ));
    }

    #[test]
    fn overflowing_geometry_is_rejected() {
        let config = FlashConfigBuilder::new()
            .with_pages_per_block(usize::MAX / 2)
            .with_blocks_per_plane(4)
            .build();
        assert!(matches!(
            config.geometry(),
            Err(Error::GeometryOverflow {
                field: "n_pages_per_plane"
            })
        ));
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = FlashConfig::from_toml_str(
            "[flash]\nn_channels_per_dev = 4\nerase_latency = 10\n",
        )
        .unwrap();
        assert_eq!(config.n_channels_per_dev, 4);
        assert_eq!(config.erase_latency, 10);
        assert_eq!(config.page_size, 2048);
        assert_eq!(config.timings().read.ticks(), 1);
        assert_eq!(config.timings().erase.ticks(), 10);
    }

    #[test]
    fn empty_toml_is_the_default() {
        assert_eq!(FlashConfig::from_toml_str("").unwrap(), FlashConfig::default());
    }

    #[test]
    fn unknown_keys_are_a_config_error() {
        let err = FlashConfig::from_toml_str("[flash]\nn_dies = 3\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
