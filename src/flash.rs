//! In-memory NAND flash used as the data plane behind the metered controller.
//!
//! The flash stores page contents, enforces erase-before-program, counts
//! page reads/programs and block erases, tracks per-block erase cycles, and
//! can log tagged transactions for later inspection. A simple wear-out model
//! injects stuck-at-0/1 bits once a block has been erased more often than
//! its safe cycle count.

use std::collections::HashMap;

use rand::SeedableRng;

use crate::address::{Pbn, Ppn};
use crate::config::FlashGeometry;
use crate::transaction::{Transaction, TransactionLogLevel};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PageState {
    Erased,
    /// Programmed, with or without payload. Writes without payload only
    /// mark the page as used.
    Programmed(Option<Vec<u8>>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StuckBit {
    pub offset: usize,
    pub mask: u8,
    pub stuck_at_one: bool,
}

impl StuckBit {
    pub fn apply(&self, data: &mut [u8]) {
        if let Some(byte) = data.get_mut(self.offset) {
            if self.stuck_at_one {
                *byte |= self.mask;
            } else {
                *byte &= !self.mask;
            }
        }
    }
}

/// Builder for [`SimulatedNandFlash`], including logging and simple wear-out.
pub struct SimulatedNandFlashBuilder {
    geometry: FlashGeometry,
    minimum_erase_cycles: u32,
    bit_failure_every_x_erases: u32,
    rng_seed: Option<u64>,
    log_level: TransactionLogLevel,
}

impl SimulatedNandFlashBuilder {
    /// Start a builder for a flash laid out like `geometry`.
    pub fn new(geometry: &FlashGeometry) -> Self {
        Self {
            geometry: *geometry,
            minimum_erase_cycles: u32::MAX,
            bit_failure_every_x_erases: u32::MAX,
            rng_seed: None,
            log_level: TransactionLogLevel::None,
        }
    }
    /// Set the number of erase cycles a block survives without failures.
    pub fn with_minimum_erase_cycles(mut self, cycles: u32) -> Self {
        self.minimum_erase_cycles = cycles;
        self
    }
    /// Past the safe limit, inject one stuck bit every `bit_failure_every_x_erases`
    /// erases of a block.
    pub fn with_failure_rate(mut self, bit_failure_every_x_erases: u32) -> Self {
        self.bit_failure_every_x_erases = bit_failure_every_x_erases.max(1);
        self
    }
    /// Make failure injection deterministic by fixing the RNG seed.
    pub fn with_rng_seed(mut self, rng_seed: u64) -> Self {
        self.rng_seed = Some(rng_seed);
        self
    }
    /// Enable transaction logging at the requested granularity.
    pub fn with_logging(mut self, level: TransactionLogLevel) -> Self {
        self.log_level = level;
        self
    }
    pub fn build<O>(&self) -> SimulatedNandFlash<O> {
        let mut flash = SimulatedNandFlash::new(&self.geometry);
        flash.minimum_safe_erase_cycles = self.minimum_erase_cycles;
        flash.bit_failure_every_x_erases = self.bit_failure_every_x_erases;
        flash.rng = match self.rng_seed {
            Some(seed) => rand::rngs::SmallRng::seed_from_u64(seed),
            None => rand::rngs::SmallRng::from_os_rng(),
        };
        flash.set_logging(self.log_level);
        flash
    }
}

/// In-memory NAND flash addressed by flat page and block numbers.
///
/// `O` is the tag type callers attach to every operation; it is stored in
/// the transaction log.
pub struct SimulatedNandFlash<O = ()> {
    pub(crate) page_size: usize,
    pub(crate) pages_per_block: usize,
    pub(crate) pages: Vec<PageState>,
    pub(crate) stuck_bits: HashMap<Ppn, Vec<StuckBit>>,
    pub(crate) block_cycles: Vec<u32>,
    pub(crate) pages_read: usize,
    pub(crate) pages_written: usize,
    pub(crate) blocks_erased: usize,
    pub(crate) bytes_read: usize,
    pub(crate) bytes_written: usize,
    pub(crate) log_level: TransactionLogLevel,
    pub(crate) transactions: Vec<Transaction<O>>,
    pub(crate) rng: rand::rngs::SmallRng,
    pub(crate) minimum_safe_erase_cycles: u32,
    pub(crate) bit_failure_every_x_erases: u32,
}

impl<O> SimulatedNandFlash<O> {
    /// Create a fully erased flash without wear-out.
    pub fn new(geometry: &FlashGeometry) -> Self {
        Self {
            page_size: geometry.page_size,
            pages_per_block: geometry.n_pages_per_block,
            pages: vec![PageState::Erased; geometry.n_pages_per_dev],
            stuck_bits: HashMap::new(),
            block_cycles: vec![0; geometry.n_blocks_per_dev],
            pages_read: 0,
            pages_written: 0,
            blocks_erased: 0,
            bytes_read: 0,
            bytes_written: 0,
            log_level: TransactionLogLevel::None,
            transactions: Vec::new(),
            rng: rand::rngs::SmallRng::seed_from_u64(0),
            minimum_safe_erase_cycles: u32::MAX,
            bit_failure_every_x_erases: u32::MAX,
        }
    }
    /// Set the transaction logging level for subsequent operations.
    pub fn set_logging(&mut self, level: TransactionLogLevel) {
        self.log_level = level;
    }
    /// Erase everything and clear statistics and injected failures.
    pub fn reset(&mut self) {
        self.pages.fill(PageState::Erased);
        self.reset_stats();
        self.reset_failures();
    }
    /// Clear counters and transactions. Wear history is kept.
    pub fn reset_stats(&mut self) {
        self.pages_read = 0;
        self.pages_written = 0;
        self.blocks_erased = 0;
        self.bytes_read = 0;
        self.bytes_written = 0;
        self.transactions.clear();
    }
    /// Remove all stuck bits and reset wear counters.
    pub fn reset_failures(&mut self) {
        self.stuck_bits.clear();
        self.block_cycles.fill(0);
    }
    pub fn page_size(&self) -> usize {
        self.page_size
    }
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
    pub fn block_count(&self) -> usize {
        self.block_cycles.len()
    }
    /// Whether `ppn` has been programmed since its block was last erased.
    pub fn is_programmed(&self, ppn: Ppn) -> bool {
        matches!(self.pages.get(ppn), Some(PageState::Programmed(_)))
    }
    pub fn programmed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| matches!(p, PageState::Programmed(_)))
            .count()
    }
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }
    pub fn pages_written(&self) -> usize {
        self.pages_written
    }
    pub fn blocks_erased(&self) -> usize {
        self.blocks_erased
    }
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
    /// Number of stuck bits injected so far.
    pub fn stuck_bit_count(&self) -> usize {
        self.stuck_bits.values().map(Vec::len).sum()
    }
    pub fn transactions(&self) -> &[Transaction<O>] {
        &self.transactions
    }
    /// Per-block erase cycle counters for wear analysis.
    pub fn block_erase_cycles(&self) -> &[u32] {
        &self.block_cycles
    }

    pub(crate) fn record(&mut self, transaction: Transaction<O>) {
        if self.log_level != TransactionLogLevel::None {
            self.transactions.push(transaction);
        }
    }

    pub(crate) fn block_pages(&self, pbn: Pbn) -> std::ops::Range<Ppn> {
        pbn * self.pages_per_block..(pbn + 1) * self.pages_per_block
    }
}

/// A lightweight capture of the flash state and statistics for inspection.
#[derive(Clone, Default, Debug)]
pub struct NandSnapshot {
    pub block_cycles: Vec<u32>,
    pub programmed_pages: usize,
    pub pages_read: usize,
    pub pages_written: usize,
    pub blocks_erased: usize,
    pub bytes_read: usize,
    pub bytes_written: usize,
    pub stuck_bits: usize,
    pub transactions_len: usize,
    /// Tag of the most recent logged transaction, if any.
    pub last_tag: Option<String>,
}

impl<O: ToString> SimulatedNandFlash<O> {
    pub fn snapshot(&self) -> NandSnapshot {
        NandSnapshot {
            block_cycles: self.block_cycles.clone(),
            programmed_pages: self.programmed_pages(),
            pages_read: self.pages_read,
            pages_written: self.pages_written,
            blocks_erased: self.blocks_erased,
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            stuck_bits: self.stuck_bit_count(),
            transactions_len: self.transactions.len(),
            last_tag: self.transactions.last().map(|t| t.tag().to_string()),
        }
    }
}
