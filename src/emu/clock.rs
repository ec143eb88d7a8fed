//! Emulated-time clock generator with deferred "propagation delay" events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use super::signal::{SignalBus, SignalId, SignalState};

/// Identifies a device within its board, used to route notifications back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u16);

/// Work to perform when a [`ClockEvent`] expires.
pub enum Deferred {
    /// Drive a line to a state.
    Drive(SignalId, SignalState),
    /// Call [`Device::on_clock_event`][super::device::Device::on_clock_event] on the owner with this token.
    Notify(DeviceId, u32),
    /// Run an arbitrary callback against the bus.
    Task(Box<dyn FnOnce(&mut SignalBus) + Send>),
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drive(id, state) => write!(f, "Drive({id}, {state:?})"),
            Self::Notify(owner, token) => write!(f, "Notify({owner:?}, {token})"),
            Self::Task(_) => f.write_str("Task(..)"),
        }
    }
}

/// A one-shot event: fires once when the counter reaches `expiry`, then is dropped.
#[derive(Debug)]
pub struct ClockEvent {
    pub expiry: u64,
    pub label: &'static str,
    pub action: Deferred,
    seq: u64,
}

impl PartialEq for ClockEvent {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.seq == other.seq
    }
}

impl Eq for ClockEvent {}

impl PartialOrd for ClockEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClockEvent {
    // Reversed so the BinaryHeap pops the earliest expiry, then the earliest scheduled.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .expiry
            .cmp(&self.expiry)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Monotonic tick counter plus pending events keyed by expiry tick.
#[derive(Debug, Default)]
pub struct ClockGenerator {
    // None until the first tick.
    counter: Option<u64>,
    elapsed: u64,
    seq: u64,
    events: BinaryHeap<ClockEvent>,
}

impl ClockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current tick. Reads 0 before the first tick.
    pub fn counter(&self) -> u64 {
        self.counter.unwrap_or(0)
    }

    /// Ticks since construction or the last reset.
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Advances the counter by one. Due events are collected with [`pop_due`][Self::pop_due].
    pub fn tick(&mut self) {
        self.counter = Some(self.counter.map_or(0, |c| c + 1));
        self.elapsed += 1;
    }

    /// Removes the next event whose expiry is at or before the counter.
    ///
    /// Events scheduled while draining that are already due come out of the same drain.
    pub fn pop_due(&mut self) -> Option<ClockEvent> {
        let now = self.counter?;
        if self.events.peek().is_some_and(|e| e.expiry <= now) {
            self.events.pop()
        } else {
            None
        }
    }

    /// Schedules `action` to fire `delay` ticks from now.
    pub fn schedule(&mut self, delay: u64, label: &'static str, action: Deferred) {
        // Before the first tick the counter sits at -1, so "now + delay" is just `delay`.
        let expiry = self.counter.map_or(delay, |c| c + delay);
        log::trace!("schedule {label} at {expiry}");
        self.seq += 1;
        self.events.push(ClockEvent {
            expiry,
            label,
            action,
            seq: self.seq,
        });
    }

    /// Drops every pending event and rewinds the counter.
    pub fn reset(&mut self) {
        self.counter = None;
        self.elapsed = 0;
        self.events.clear();
    }
}

/// The clock as seen by one device during its tick.
pub struct DeviceClock<'a> {
    clock: &'a mut ClockGenerator,
    owner: DeviceId,
}

impl<'a> DeviceClock<'a> {
    pub fn new(clock: &'a mut ClockGenerator, owner: DeviceId) -> Self {
        Self { clock, owner }
    }

    pub fn counter(&self) -> u64 {
        self.clock.counter()
    }

    pub fn schedule_signal(&mut self, delay: u64, id: SignalId, state: SignalState, label: &'static str) {
        self.clock.schedule(delay, label, Deferred::Drive(id, state));
    }

    /// Schedules a call back into the ticking device.
    pub fn schedule_self(&mut self, delay: u64, token: u32, label: &'static str) {
        self.clock.schedule(delay, label, Deferred::Notify(self.owner, token));
    }

    pub fn schedule_task(
        &mut self,
        delay: u64,
        label: &'static str,
        task: impl FnOnce(&mut SignalBus) + Send + 'static,
    ) {
        self.clock.schedule(delay, label, Deferred::Task(Box::new(task)));
    }
}
