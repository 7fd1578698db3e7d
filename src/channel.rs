use std::cell::Cell;

use log::trace;

use crate::config::ChannelTimings;
use crate::request::Operation;
use crate::sim::{Resource, SimDuration, SimHandle};

/// Per-channel service counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub reads: usize,
    pub writes: usize,
    pub erases: usize,
    /// Ticks spent holding the bus.
    pub busy_ticks: u64,
}

impl ChannelStats {
    pub fn operations(&self) -> usize {
        self.reads + self.writes + self.erases
    }
}

/// One flash bus without pipelining: a resource that cannot be shared and
/// that stays busy for a fixed time per operation.
pub struct Channel {
    id: usize,
    sim: SimHandle,
    resource: Resource,
    timings: ChannelTimings,
    stats: Cell<ChannelStats>,
}

impl Channel {
    pub fn new(sim: SimHandle, id: usize, timings: ChannelTimings) -> Self {
        Self {
            id,
            sim,
            resource: Resource::new(),
            timings,
            stats: Cell::new(ChannelStats::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn timings(&self) -> &ChannelTimings {
        &self.timings
    }

    pub fn latency(&self, operation: Operation) -> SimDuration {
        match operation {
            Operation::Read => self.timings.read,
            Operation::Write => self.timings.program,
            Operation::Erase => self.timings.erase,
        }
    }

    /// Wait for the bus, hold it for the operation's latency, release it.
    pub async fn perform(&self, operation: Operation) {
        let _bus = self.resource.acquire().await;
        let latency = self.latency(operation);
        trace!(
            "channel {}: {} starts at {}",
            self.id,
            operation,
            self.sim.now().ticks()
        );
        self.sim.timeout(latency).await;

        let mut stats = self.stats.get();
        match operation {
            Operation::Read => stats.reads += 1,
            Operation::Write => stats.writes += 1,
            Operation::Erase => stats.erases += 1,
        }
        stats.busy_ticks += latency.ticks();
        self.stats.set(stats);
        trace!(
            "channel {}: {} done at {}",
            self.id,
            operation,
            self.sim.now().ticks()
        );
    }

    pub fn is_busy(&self) -> bool {
        self.resource.is_held()
    }

    /// Operations waiting behind the one in service.
    pub fn queue_depth(&self) -> usize {
        self.resource.queue_len()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.get()
    }

    pub fn reset_stats(&self) {
        self.stats.set(ChannelStats::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulation;

    #[test]
    fn latency_depends_on_the_operation() {
        let sim = Simulation::new();
        let channel = Channel::new(sim.handle(), 0, ChannelTimings::default());
        assert_eq!(channel.latency(Operation::Read).ticks(), 1);
        assert_eq!(channel.latency(Operation::Write).ticks(), 2);
        assert_eq!(channel.latency(Operation::Erase).ticks(), 3);
    }

    #[test]
    fn same_channel_operations_serialize() {
        let mut sim = Simulation::new();
        let handle = sim.handle();
        let channel = Channel::new(handle.clone(), 0, ChannelTimings::default());
        let finished = sim
            .block_on(async {
                let first = async {
                    channel.perform(Operation::Write).await;
                    handle.now().ticks()
                };
                let second = async {
                    channel.perform(Operation::Write).await;
                    handle.now().ticks()
                };
                futures::join!(first, second)
            })
            .unwrap();
        assert_eq!(finished, (2, 4));
        let stats = channel.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.busy_ticks, 4);
        assert!(!channel.is_busy());
    }

    #[test]
    fn mixed_operations_accumulate_busy_time() {
        let mut sim = Simulation::new();
        let channel = Channel::new(sim.handle(), 3, ChannelTimings::default());
        sim.block_on(async {
            channel.perform(Operation::Read).await;
            channel.perform(Operation::Erase).await;
        })
        .unwrap();
        assert_eq!(sim.now().ticks(), 4);
        assert_eq!(
            channel.stats(),
            ChannelStats {
                reads: 1,
                writes: 0,
                erases: 1,
                busy_ticks: 4
            }
        );
        channel.reset_stats();
        assert_eq!(channel.stats().operations(), 0);
    }
}
