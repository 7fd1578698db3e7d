//! Single-threaded discrete-event scheduler.
//!
//! Every simulated process is a future running on a [`LocalPool`]. The only
//! way for a process to let simulated time pass is to await a [`Timeout`];
//! the scheduler advances the clock straight to the earliest pending
//! deadline once no process can make progress at the current instant.
//!
//! [`Resource`] is a single-slot FIFO lock: the second suspension point of
//! the model. A process that finds the slot taken queues behind every
//! earlier arrival.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool};
use std::task::{Context, Poll, Waker};

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::RemoteHandle;
use futures::task::{ArcWake, LocalSpawnExt};

use crate::error::{Error, Result};

/// A point on the simulated clock. One tick is one simulated time unit.
pub type SimInstant = fugit::TimerInstantU64<1>;
/// A span of simulated time, in ticks.
pub type SimDuration = fugit::TimerDurationU64<1>;

/// Handle to a spawned simulation process. Dropping it cancels the process.
pub type JoinHandle<T> = RemoteHandle<T>;

#[derive(Default)]
struct TimerSlot {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl TimerSlot {
    fn fire(&self) {
        self.fired.set(true);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

struct TimerEntry {
    deadline: u64,
    seq: u64,
    slot: Rc<TimerSlot>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct Clock {
    now: Cell<u64>,
    next_seq: Cell<u64>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
}

impl Clock {
    fn schedule(&self, deadline: u64, slot: Rc<TimerSlot>) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers
            .borrow_mut()
            .push(Reverse(TimerEntry { deadline, seq, slot }));
    }

    /// Advance to the earliest deadline and fire every timer due then, in
    /// registration order. Returns `false` when no timer is pending.
    fn fire_next(&self) -> bool {
        let due = {
            let mut timers = self.timers.borrow_mut();
            let Some(Reverse(first)) = timers.pop() else {
                return false;
            };
            let deadline = first.deadline;
            let mut due = vec![first];
            while timers
                .peek()
                .is_some_and(|Reverse(next)| next.deadline == deadline)
            {
                if let Some(Reverse(next)) = timers.pop() {
                    due.push(next);
                }
            }
            self.now.set(deadline);
            due
        };
        for entry in due {
            entry.slot.fire();
        }
        true
    }

    fn pending(&self) -> usize {
        self.timers.borrow().len()
    }
}

/// Cloneable handle through which processes observe and consume simulated
/// time.
#[derive(Clone)]
pub struct SimHandle {
    clock: Rc<Clock>,
    spawner: LocalSpawner,
}

impl SimHandle {
    pub fn now(&self) -> SimInstant {
        SimInstant::from_ticks(self.clock.now.get())
    }

    /// A future that resolves once `delay` ticks of simulated time have
    /// passed. The deadline is fixed when this is called, not when the
    /// future is first polled.
    pub fn timeout(&self, delay: SimDuration) -> Timeout {
        let slot = Rc::new(TimerSlot::default());
        let deadline = self.clock.now.get() + delay.ticks();
        self.clock.schedule(deadline, slot.clone());
        Timeout { slot }
    }

    /// Start `future` as an independent simulation process.
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.spawner
            .spawn_local_with_handle(future)
            .map_err(|_| Error::Shutdown)
    }
}

/// Future returned by [`SimHandle::timeout`].
pub struct Timeout {
    slot: Rc<TimerSlot>,
}

impl Future for Timeout {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.slot.fired.get() {
            Poll::Ready(())
        } else {
            *self.slot.waker.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, atomic::Ordering::SeqCst);
    }
}

/// Owner of the executor and the simulated clock.
pub struct Simulation {
    pool: LocalPool,
    handle: SimHandle,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    /// A fresh simulation with the clock at tick 0.
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let handle = SimHandle {
            clock: Rc::new(Clock::default()),
            spawner: pool.spawner(),
        };
        Self { pool, handle }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    pub fn now(&self) -> SimInstant {
        self.handle.now()
    }

    /// Number of timers that have been scheduled but not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.handle.clock.pending()
    }

    /// Drive every spawned process until nothing is runnable and no timer
    /// is pending. Returns the instant the simulation went quiet.
    pub fn run(&mut self) -> SimInstant {
        loop {
            self.pool.run_until_stalled();
            if !self.handle.clock.fire_next() {
                return self.now();
            }
        }
    }

    /// Drive the simulation until `future` completes and return its output.
    ///
    /// `future` is polled in place, so it may borrow from the caller. Other
    /// spawned processes keep running alongside it.
    pub fn block_on<F: Future>(&mut self, future: F) -> Result<F::Output> {
        let mut future = pin!(future);
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let waker = futures::task::waker(flag.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            if flag.0.swap(false, atomic::Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return Ok(output);
                }
            }
            self.pool.run_until_stalled();
            if flag.0.load(atomic::Ordering::SeqCst) {
                continue;
            }
            if !self.handle.clock.fire_next() {
                return Err(Error::Deadlock);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Held,
    /// Handed to the waiter with this ticket, which has not yet been polled.
    Reserved(u64),
}

struct ResourceState {
    slot: SlotState,
    next_ticket: u64,
    waiters: VecDeque<(u64, Option<Waker>)>,
}

impl ResourceState {
    fn release(&mut self) {
        match self.waiters.pop_front() {
            Some((ticket, waker)) => {
                self.slot = SlotState::Reserved(ticket);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            None => self.slot = SlotState::Free,
        }
    }
}

/// A mutual-exclusion slot with capacity one and FIFO hand-off.
#[derive(Clone)]
pub struct Resource {
    state: Rc<RefCell<ResourceState>>,
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ResourceState {
                slot: SlotState::Free,
                next_ticket: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Wait for the slot. It is held until the returned guard is dropped.
    pub fn acquire(&self) -> Acquire {
        Acquire {
            state: self.state.clone(),
            ticket: None,
            done: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.state.borrow().slot != SlotState::Free
    }

    /// Number of processes queued behind the current holder.
    pub fn queue_len(&self) -> usize {
        self.state.borrow().waiters.len()
    }
}

/// Future returned by [`Resource::acquire`].
pub struct Acquire {
    state: Rc<RefCell<ResourceState>>,
    ticket: Option<u64>,
    done: bool,
}

impl Future for Acquire {
    type Output = ResourceGuard;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ResourceGuard> {
        let this = &mut *self;
        let mut state = this.state.borrow_mut();
        match this.ticket {
            None if state.slot == SlotState::Free && state.waiters.is_empty() => {
                state.slot = SlotState::Held;
            }
            None => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.waiters.push_back((ticket, Some(cx.waker().clone())));
                this.ticket = Some(ticket);
                return Poll::Pending;
            }
            Some(ticket) if state.slot == SlotState::Reserved(ticket) => {
                state.slot = SlotState::Held;
                this.ticket = None;
            }
            Some(ticket) => {
                if let Some(entry) = state.waiters.iter_mut().find(|(t, _)| *t == ticket) {
                    entry.1 = Some(cx.waker().clone());
                }
                return Poll::Pending;
            }
        }
        drop(state);
        this.done = true;
        Poll::Ready(ResourceGuard {
            state: this.state.clone(),
        })
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(ticket) = self.ticket else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if state.slot == SlotState::Reserved(ticket) {
            state.release();
        } else {
            state.waiters.retain(|(t, _)| *t != ticket);
        }
    }
}

/// Proof of holding a [`Resource`]; releases it on drop.
pub struct ResourceGuard {
    state: Rc<RefCell<ResourceState>>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.state.borrow_mut().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_advance_the_clock() {
        let mut sim = Simulation::new();
        let handle = sim.handle();
        let end = sim
            .block_on(async {
                handle.timeout(SimDuration::from_ticks(3)).await;
                handle.timeout(SimDuration::from_ticks(4)).await;
                handle.now()
            })
            .unwrap();
        assert_eq!(end.ticks(), 7);
        assert_eq!(sim.pending_timers(), 0);
    }

    #[test]
    fn spawned_processes_run_concurrently() {
        let mut sim = Simulation::new();
        let handle = sim.handle();
        let log = Rc::new(RefCell::new(Vec::new()));
        for delay in [5u64, 1, 3] {
            let h = handle.clone();
            let log = log.clone();
            handle
                .spawn(async move {
                    h.timeout(SimDuration::from_ticks(delay)).await;
                    log.borrow_mut().push((delay, h.now().ticks()));
                })
                .unwrap()
                .forget();
        }
        assert_eq!(sim.run().ticks(), 5);
        assert_eq!(*log.borrow(), vec![(1, 1), (3, 3), (5, 5)]);
    }

    #[test]
    fn resource_is_fifo_and_exclusive() {
        let mut sim = Simulation::new();
        let handle = sim.handle();
        let resource = Resource::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut joins = Vec::new();
        for id in 0..3u64 {
            let h = handle.clone();
            let r = resource.clone();
            let log = log.clone();
            joins.push(
                handle
                    .spawn(async move {
                        let _guard = r.acquire().await;
                        let start = h.now().ticks();
                        h.timeout(SimDuration::from_ticks(2)).await;
                        log.borrow_mut().push((id, start, h.now().ticks()));
                    })
                    .unwrap(),
            );
        }
        sim.block_on(futures::future::join_all(joins)).unwrap();
        assert_eq!(*log.borrow(), vec![(0, 0, 2), (1, 2, 4), (2, 4, 6)]);
        assert!(!resource.is_held());
        assert_eq!(resource.queue_len(), 0);
    }

    #[test]
    fn dropping_a_queued_acquire_leaves_the_queue() {
        let mut sim = Simulation::new();
        let resource = Resource::new();
        let r = resource.clone();
        sim.block_on(async move {
            let guard = r.acquire().await;
            let mut waiting = Box::pin(r.acquire());
            assert!(futures::poll!(waiting.as_mut()).is_pending());
            assert_eq!(r.queue_len(), 1);
            drop(waiting);
            assert_eq!(r.queue_len(), 0);
            drop(guard);
        })
        .unwrap();
        assert!(!resource.is_held());
    }

    #[test]
    fn dropping_a_reserved_acquire_passes_the_slot_on() {
        let mut sim = Simulation::new();
        let resource = Resource::new();
        let r = resource.clone();
        sim.block_on(async move {
            let guard = r.acquire().await;
            let mut first = Box::pin(r.acquire());
            let mut second = Box::pin(r.acquire());
            assert!(futures::poll!(first.as_mut()).is_pending());
            assert!(futures::poll!(second.as_mut()).is_pending());
            drop(guard);
            drop(first);
            let _held = second.await;
            assert!(r.is_held());
        })
        .unwrap();
        assert!(!resource.is_held());
    }

    #[test]
    fn waiting_on_nothing_is_a_deadlock() {
        let mut sim = Simulation::new();
        let result = sim.block_on(futures::future::pending::<()>());
        assert!(matches!(result, Err(Error::Deadlock)));
    }
}
