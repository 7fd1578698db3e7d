//! The flash controller: owns the channels, turns flat page/block ranges into
//! physical requests and runs them with channel-level parallelism.

use futures::future::join_all;
use log::{debug, info, trace};

use crate::address::{AddressTranslator, Pbn, Ppn};
use crate::channel::{Channel, ChannelStats};
use crate::config::{FlashConfig, FlashGeometry};
use crate::error::Result;
use crate::request::{BlockRangeRequest, FlashRequest, Operation, PageRangeRequest};
use crate::sim::{SimHandle, SimInstant};

pub struct FlashController {
    sim: SimHandle,
    translator: AddressTranslator,
    channels: Vec<Channel>,
}

impl FlashController {
    /// Build the geometry from `config` and one channel per configured bus.
    pub fn new(sim: SimHandle, config: &FlashConfig) -> Result<Self> {
        let geometry = config.geometry()?;
        let timings = config.timings();
        let channels = (0..geometry.n_channels_per_dev)
            .map(|id| Channel::new(sim.clone(), id, timings))
            .collect();
        info!(
            "flash controller: {} channels, {} pages/channel, {} pages of {} bytes",
            geometry.n_channels_per_dev,
            geometry.n_pages_per_channel,
            geometry.n_pages_per_dev,
            geometry.page_size
        );
        Ok(Self {
            sim,
            translator: AddressTranslator::new(geometry),
            channels,
        })
    }

    pub fn geometry(&self) -> &FlashGeometry {
        self.translator.geometry()
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn sim(&self) -> &SimHandle {
        &self.sim
    }

    pub fn now(&self) -> SimInstant {
        self.sim.now()
    }

    /// Read or write requests for pages `start..start + count`.
    pub fn build_requests_for_page_range(
        &self,
        start: Ppn,
        count: usize,
        operation: Operation,
    ) -> Vec<FlashRequest> {
        PageRangeRequest::new(start, count, operation).requests(&self.translator)
    }

    /// Erase requests for blocks `start..start + count`.
    pub fn build_requests_for_block_range(
        &self,
        start: Pbn,
        count: usize,
        operation: Operation,
    ) -> Vec<FlashRequest> {
        BlockRangeRequest::new(start, count, operation).requests(&self.translator)
    }

    /// Run one request on its channel.
    pub async fn execute(&self, request: FlashRequest) {
        trace!(
            "dispatch {} to channel {} at {}",
            request.operation(),
            request.channel(),
            self.sim.now().ticks()
        );
        self.channels[request.channel()]
            .perform(request.operation())
            .await;
    }

    /// Run every request concurrently and return once the last one is done.
    ///
    /// Each request queues on its own channel immediately, in slice order, so
    /// the batch takes as long as the busiest channel rather than the sum.
    pub async fn execute_batch(&self, requests: &[FlashRequest]) {
        let start = self.sim.now();
        join_all(requests.iter().map(|request| self.execute(*request))).await;
        debug!(
            "batch of {} requests joined after {} ticks",
            requests.len(),
            self.sim.now().ticks() - start.ticks()
        );
    }

    pub async fn read_range(&self, page_start: Ppn, page_count: usize) {
        let requests = self.build_requests_for_page_range(page_start, page_count, Operation::Read);
        self.execute_batch(&requests).await;
    }

    pub async fn write_range(&self, page_start: Ppn, page_count: usize) {
        let requests =
            self.build_requests_for_page_range(page_start, page_count, Operation::Write);
        self.execute_batch(&requests).await;
    }

    pub async fn erase_range(&self, block_start: Pbn, block_count: usize) {
        let requests =
            self.build_requests_for_block_range(block_start, block_count, Operation::Erase);
        self.execute_batch(&requests).await;
    }

    /// Snapshot of every channel's counters, indexed by channel id.
    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(Channel::stats).collect()
    }

    pub fn reset_channel_stats(&self) {
        self.channels.iter().for_each(Channel::reset_stats);
    }
}
