use std::collections::BTreeSet;

use log::info;

use super::{Phase, Workload};
use crate::address::{Pbn, Ppn};
use crate::error::{Error, Result};
use crate::flash::SimulatedNandFlash;
use crate::metered::MeteredController;
use crate::request::{FlashRequest, Operation};
use crate::sim::Simulation;

/// Outcome of one [`run_workload`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadReport {
    pub workload: Workload,
    pub pages: usize,
    pub blocks: usize,
    /// Requests issued per batch.
    pub batch_size: usize,
    pub write_ticks: u64,
    pub read_ticks: u64,
    pub erase_ticks: u64,
    /// Highest per-batch channel contention seen by the metered controller.
    pub max_contention: usize,
    /// Pages whose read-back payload differed from what was written.
    pub corrupted_reads: usize,
}

/// Page contents for `ppn`: its little-endian bytes repeated over the page.
fn payload(ppn: Ppn, page_size: usize) -> Vec<u8> {
    (ppn as u64)
        .to_le_bytes()
        .into_iter()
        .cycle()
        .take(page_size)
        .collect()
}

/// Erase every block the workload touches, program its pages, then read them
/// back. Each phase is issued in batches of one request per channel; the
/// controller supplies the timing and the metered backend holds the data.
/// Stuck bits injected by the erase phase show up as corrupted reads.
pub fn run_workload(
    sim: &mut Simulation,
    metered: &mut MeteredController<SimulatedNandFlash<Phase>>,
    workload: Workload,
    pages: usize,
    seed: u64,
) -> Result<WorkloadReport> {
    let geometry = *metered.controller().geometry();
    if pages > geometry.n_pages_per_dev {
        return Err(Error::WorkloadTooLarge {
            pages,
            capacity: geometry.n_pages_per_dev,
        });
    }
    let translator = *metered.controller().translator();
    let batch_size = geometry.n_channels_per_dev;
    let ppns = workload.pages(&geometry, pages, seed);
    let pbns: Vec<Pbn> = ppns
        .iter()
        .map(|&ppn| translator.page_to_block_offset(ppn).0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let start = sim.now();
    for chunk in pbns.chunks(batch_size) {
        let requests: Vec<_> = chunk
            .iter()
            .map(|&pbn| FlashRequest::new(Operation::Erase, translator.block_to_address(pbn)))
            .collect();
        sim.block_on(metered.controller().execute_batch(&requests))?;
        metered.erase_blocks(chunk, Phase::Erase)?;
    }
    let erase_ticks = sim.now().ticks() - start.ticks();

    let start = sim.now();
    for chunk in ppns.chunks(batch_size) {
        let requests: Vec<_> = chunk
            .iter()
            .map(|&ppn| FlashRequest::new(Operation::Write, translator.page_to_address(ppn)))
            .collect();
        sim.block_on(metered.controller().execute_batch(&requests))?;
        let data: Vec<_> = chunk
            .iter()
            .map(|&ppn| payload(ppn, geometry.page_size))
            .collect();
        metered.write_pages(chunk, Some(data.as_slice()), Phase::Write)?;
    }
    let write_ticks = sim.now().ticks() - start.ticks();

    let start = sim.now();
    let mut corrupted_reads = 0;
    for chunk in ppns.chunks(batch_size) {
        let requests: Vec<_> = chunk
            .iter()
            .map(|&ppn| FlashRequest::new(Operation::Read, translator.page_to_address(ppn)))
            .collect();
        sim.block_on(metered.controller().execute_batch(&requests))?;
        let data = metered.read_pages(chunk, Phase::Read)?;
        corrupted_reads += chunk
            .iter()
            .zip(&data)
            .filter(|&(&ppn, read)| {
                read.as_deref() != Some(payload(ppn, geometry.page_size).as_slice())
            })
            .count();
    }
    let read_ticks = sim.now().ticks() - start.ticks();

    let report = WorkloadReport {
        workload,
        pages,
        blocks: pbns.len(),
        batch_size,
        write_ticks,
        read_ticks,
        erase_ticks,
        max_contention: metered.recorder().max_observed(),
        corrupted_reads,
    };
    info!(
        "{workload}: {pages} pages / {} blocks, erase {erase_ticks} write {write_ticks} read {read_ticks} ticks",
        report.blocks
    );
    info!(
        "max contention {}, {} corrupted reads",
        report.max_contention, report.corrupted_reads
    );
    Ok(report)
}
