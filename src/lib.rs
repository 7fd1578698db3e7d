//! NAND flash controller simulator for evaluating flash translation layers.
//!
//! This crate models how page and block requests map onto a
//! channel/package/chip/plane/block/page hierarchy and how concurrent
//! requests contend for the shared per-channel bus over simulated time.
//! Everything runs on a deterministic, single-threaded discrete-event
//! scheduler: processes are futures, and simulated time only passes while a
//! process waits for a channel or sleeps through an operation's latency.
//!
//! Typical use:
//! - Describe the device with a [`FlashConfig`] (or load one from TOML).
//! - Create a [`Simulation`] and a [`FlashController`] on its handle.
//! - Await `read_range`/`write_range`/`erase_range` or `execute_batch`
//!   inside [`Simulation::block_on`]; read the clock afterwards.
//! - Wrap the controller in a [`MeteredController`] with a
//!   [`SimulatedNandFlash`] to move real page data and record per-batch
//!   channel contention.

mod address;
mod backend;
mod channel;
mod config;
mod controller;
mod error;
mod flash;
mod metered;
mod request;
mod sim;
mod transaction;
pub mod workloads;

pub use address::{AddressTranslator, Pbn, PhysicalAddress, Ppn, UNINIT_PPN};
pub use backend::{BackendError, FlashBackend};
pub use channel::{Channel, ChannelStats};
pub use config::{ChannelTimings, FlashConfig, FlashConfigBuilder, FlashGeometry};
pub use controller::FlashController;
pub use error::{Error, Result};
pub use flash::{NandSnapshot, SimulatedNandFlash, SimulatedNandFlashBuilder};
pub use metered::{
    ContentionRecorder, ContentionSample, MeteredController, max_channel_contention,
};
pub use request::{BlockRangeRequest, FlashRequest, Operation, PageRangeRequest, display_requests};
pub use sim::{
    Acquire, JoinHandle, Resource, ResourceGuard, SimDuration, SimHandle, SimInstant, Simulation,
    Timeout,
};
pub use transaction::{Transaction, TransactionLogLevel};
