//! Translation between flat page/block numbers and hierarchical addresses.

use std::fmt;

use crate::config::FlashGeometry;

/// Physical page number.
pub type Ppn = usize;
/// Physical block number.
pub type Pbn = usize;

/// Marks a page that has never been written. It maps to no channel and is
/// never charged as a flash operation.
pub const UNINIT_PPN: Ppn = Ppn::MAX;

/// Location of a page or block in the channel/package/chip/plane/block/page
/// hierarchy.
///
/// `page` is `None` for block addresses so that a block can never be
/// mistaken for its first page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysicalAddress {
    pub channel: usize,
    pub package: usize,
    pub chip: usize,
    pub plane: usize,
    pub block: usize,
    pub page: Option<usize>,
}

impl PhysicalAddress {
    pub fn is_block_address(&self) -> bool {
        self.page.is_none()
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<8}{}", "channel", self.channel)?;
        writeln!(f, "{:<8}{}", "package", self.package)?;
        writeln!(f, "{:<8}{}", "chip", self.chip)?;
        writeln!(f, "{:<8}{}", "plane", self.plane)?;
        writeln!(f, "{:<8}{}", "block", self.block)?;
        match self.page {
            Some(page) => write!(f, "{:<8}{}", "page", page),
            None => write!(f, "{:<8}-", "page"),
        }
    }
}

/// Mixed-radix conversion over a fixed [`FlashGeometry`].
///
/// Out-of-range inputs are caller bugs and panic; nothing is clamped or
/// wrapped.
#[derive(Clone, Copy, Debug)]
pub struct AddressTranslator {
    geometry: FlashGeometry,
}

impl AddressTranslator {
    pub fn new(geometry: FlashGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    pub fn page_to_address(&self, page: Ppn) -> PhysicalAddress {
        assert!(
            page < self.geometry.n_pages_per_dev,
            "page {page} out of range (device has {} pages)",
            self.geometry.n_pages_per_dev
        );
        let mut location = [0usize; 5];
        let mut remaining = page;
        for (coordinate, unit) in location.iter_mut().zip(self.geometry.page_hierarchy()) {
            *coordinate = remaining / unit;
            remaining %= unit;
        }
        let [channel, package, chip, plane, block] = location;
        PhysicalAddress {
            channel,
            package,
            chip,
            plane,
            block,
            page: Some(remaining),
        }
    }

    /// A block sits where its first page sits; the page field is cleared.
    pub fn block_to_address(&self, block: Pbn) -> PhysicalAddress {
        assert!(
            block < self.geometry.n_blocks_per_dev,
            "block {block} out of range (device has {} blocks)",
            self.geometry.n_blocks_per_dev
        );
        PhysicalAddress {
            page: None,
            ..self.page_to_address(block * self.geometry.n_pages_per_block)
        }
    }

    pub fn address_to_page(&self, addr: &PhysicalAddress) -> Ppn {
        let Some(page) = addr.page else {
            panic!("block address used where a page address is required:\n{addr}");
        };
        assert!(
            page < self.geometry.n_pages_per_block,
            "page coordinate {page} out of range"
        );
        self.first_page_of(addr) + page
    }

    pub fn address_to_block(&self, addr: &PhysicalAddress) -> Pbn {
        assert!(
            addr.is_block_address(),
            "page address used where a block address is required:\n{addr}"
        );
        self.first_page_of(addr) / self.geometry.n_pages_per_block
    }

    fn first_page_of(&self, addr: &PhysicalAddress) -> Ppn {
        let g = &self.geometry;
        let coordinates = [
            (addr.channel, g.n_channels_per_dev, "channel"),
            (addr.package, g.n_packages_per_channel, "package"),
            (addr.chip, g.n_chips_per_package, "chip"),
            (addr.plane, g.n_planes_per_chip, "plane"),
            (addr.block, g.n_blocks_per_plane, "block"),
        ];
        let mut page = 0;
        for ((value, size, name), unit) in coordinates.into_iter().zip(g.page_hierarchy()) {
            assert!(value < size, "{name} coordinate {value} out of range (size {size})");
            page += value * unit;
        }
        page
    }

    /// Split a page number into its device-wide block and the offset inside it.
    pub fn page_to_block_offset(&self, ppn: Ppn) -> (Pbn, usize) {
        (
            ppn / self.geometry.n_pages_per_block,
            ppn % self.geometry.n_pages_per_block,
        )
    }

    /// Channel of a block and the block's index within that channel.
    pub fn block_to_channel(&self, pbn: Pbn) -> (usize, Pbn) {
        assert!(
            pbn < self.geometry.n_blocks_per_dev,
            "block {pbn} out of range (device has {} blocks)",
            self.geometry.n_blocks_per_dev
        );
        (
            pbn / self.geometry.n_blocks_per_channel,
            pbn % self.geometry.n_blocks_per_channel,
        )
    }

    pub fn channel_of_page(&self, ppn: Ppn) -> usize {
        assert!(
            ppn < self.geometry.n_pages_per_dev,
            "page {ppn} out of range (device has {} pages)",
            self.geometry.n_pages_per_dev
        );
        ppn / self.geometry.n_pages_per_channel
    }
}
