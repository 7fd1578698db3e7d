//! A flash controller paired with a data-plane backend and a contention
//! recorder.
//!
//! Timing still comes only from [`FlashController::execute_batch`]. The
//! metered calls move data through the backend and record how unevenly each
//! batch loads the channels; that figure is observed, never applied to the
//! simulated clock.

use std::collections::HashMap;

use log::debug;

use crate::address::{Pbn, PhysicalAddress, Ppn, UNINIT_PPN};
use crate::backend::FlashBackend;
use crate::controller::FlashController;
use crate::request::Operation;

/// Largest number of addresses that share one channel. Zero for an empty
/// batch.
pub fn max_channel_contention<I>(channels: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    let mut per_channel: HashMap<usize, usize> = HashMap::new();
    for channel in channels {
        *per_channel.entry(channel).or_default() += 1;
    }
    per_channel.into_values().max().unwrap_or(0)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentionSample<T> {
    pub tag: T,
    pub operation: Operation,
    /// Addresses in the batch, sentinels included.
    pub addresses: usize,
    pub max_count: usize,
}

/// Log of per-batch channel contention.
#[derive(Clone, Debug)]
pub struct ContentionRecorder<T> {
    samples: Vec<ContentionSample<T>>,
}

impl<T> Default for ContentionRecorder<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
        }
    }
}

impl<T> ContentionRecorder<T> {
    pub fn record(&mut self, sample: ContentionSample<T>) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[ContentionSample<T>] {
        &self.samples
    }

    /// Highest contention seen in any recorded batch.
    pub fn max_observed(&self) -> usize {
        self.samples.iter().map(|s| s.max_count).max().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

pub struct MeteredController<B: FlashBackend> {
    controller: FlashController,
    backend: B,
    recorder: ContentionRecorder<B::Tag>,
}

impl<B: FlashBackend> MeteredController<B> {
    pub fn new(controller: FlashController, backend: B) -> Self {
        Self {
            controller,
            backend,
            recorder: ContentionRecorder::default(),
        }
    }

    pub fn controller(&self) -> &FlashController {
        &self.controller
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn recorder(&self) -> &ContentionRecorder<B::Tag> {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut ContentionRecorder<B::Tag> {
        &mut self.recorder
    }

    pub fn into_parts(self) -> (FlashController, B, ContentionRecorder<B::Tag>) {
        (self.controller, self.backend, self.recorder)
    }

    /// Contention over already translated addresses.
    pub fn max_channel_contention(&self, addresses: &[PhysicalAddress]) -> usize {
        max_channel_contention(addresses.iter().map(|addr| addr.channel))
    }

    /// Contention over flat page numbers; [`UNINIT_PPN`] entries are skipped.
    pub fn max_channel_page_count(&self, ppns: &[Ppn]) -> usize {
        let translator = self.controller.translator();
        let pbns: Vec<Pbn> = ppns
            .iter()
            .filter(|&&ppn| ppn != UNINIT_PPN)
            .map(|&ppn| translator.page_to_block_offset(ppn).0)
            .collect();
        self.max_channel_block_count(&pbns)
    }

    pub fn max_channel_block_count(&self, pbns: &[Pbn]) -> usize {
        let translator = self.controller.translator();
        max_channel_contention(pbns.iter().map(|&pbn| translator.block_to_channel(pbn).0))
    }

    fn observe(&mut self, tag: &B::Tag, operation: Operation, addresses: usize, max_count: usize) {
        debug!("{operation} of {addresses} addresses, max channel contention {max_count}");
        self.recorder.record(ContentionSample {
            tag: tag.clone(),
            operation,
            addresses,
            max_count,
        });
    }

    pub fn read_pages(
        &mut self,
        ppns: &[Ppn],
        tag: B::Tag,
    ) -> Result<Vec<Option<Vec<u8>>>, B::Error> {
        let max_count = self.max_channel_page_count(ppns);
        self.observe(&tag, Operation::Read, ppns.len(), max_count);

        ppns.iter()
            .map(|&ppn| self.backend.page_read(ppn, tag.clone()))
            .collect()
    }

    /// Program `ppns`, with one payload per page when `data` is given.
    ///
    /// Panics if `data` and `ppns` differ in length.
    pub fn write_pages(
        &mut self,
        ppns: &[Ppn],
        data: Option<&[Vec<u8>]>,
        tag: B::Tag,
    ) -> Result<(), B::Error> {
        let max_count = self.max_channel_page_count(ppns);
        self.observe(&tag, Operation::Write, ppns.len(), max_count);

        match data {
            None => {
                for &ppn in ppns {
                    self.backend.page_write(ppn, tag.clone(), None)?;
                }
            }
            Some(data) => {
                assert_eq!(data.len(), ppns.len(), "one payload per page is required");
                for (&ppn, item) in ppns.iter().zip(data) {
                    self.backend.page_write(ppn, tag.clone(), Some(item.as_slice()))?;
                }
            }
        }
        Ok(())
    }

    pub fn erase_blocks(&mut self, pbns: &[Pbn], tag: B::Tag) -> Result<(), B::Error> {
        let max_count = self.max_channel_block_count(pbns);
        self.observe(&tag, Operation::Erase, pbns.len(), max_count);

        for &pbn in pbns {
            self.backend.block_erase(pbn, tag.clone())?;
        }
        Ok(())
    }
}
