//! One board's emulation state and the thread that owns it.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;

use super::board::BoardConfig;
use super::clock::{ClockGenerator, Deferred, DeviceClock, DeviceId};
use super::device::{Device, DeviceSlot, DeviceState, DeviceType};
use super::memory::MemorySnapshot;
use super::name::Name;
use super::queue::CommandQueue;
use super::signal::{SignalBus, SignalId, SignalState};
use super::timer::TimerManager;
use super::EmuError;

pub type Task = Box<dyn FnOnce(&mut BoardCore) + Send>;

/// The worker thread's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// Paused: no clock steps, but commands are still serviced.
    #[default]
    Stop,
    /// Free-running: one clock step per loop, then at most one command.
    Run,
    /// Terminal. The loop exits and the thread is joined.
    Quit,
}

/// What a [`ThreadRequest::Query`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    Device(Name),
    /// Every memory device, merged in board order.
    Memory,
    Status,
    Trace,
}

/// A command for a board's worker thread.
pub enum ThreadRequest {
    Run,
    Stop,
    Quit,
    /// Runs a callback on the worker thread with full access to the board.
    ExecuteTask(Task),
    Reset,
    NonMaskableInterrupt,
    /// Runs exactly this many clock steps, whatever the run state.
    Step(u64),
    Query {
        target: QueryTarget,
        respond: oneshot::Sender<Option<DeviceState>>,
    },
}

impl fmt::Debug for ThreadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("Run"),
            Self::Stop => f.write_str("Stop"),
            Self::Quit => f.write_str("Quit"),
            Self::ExecuteTask(_) => f.write_str("ExecuteTask(..)"),
            Self::Reset => f.write_str("Reset"),
            Self::NonMaskableInterrupt => f.write_str("NonMaskableInterrupt"),
            Self::Step(n) => write!(f, "Step({n})"),
            Self::Query { target, .. } => write!(f, "Query({target:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: Name,
    pub kind: DeviceType,
    pub divider: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardStatus {
    pub state: RunState,
    pub frequency: u64,
    pub counter: u64,
    pub elapsed: u64,
    pub pending_events: usize,
    pub pending_timers: usize,
    pub devices: Vec<DeviceInfo>,
}

/// Everything a board owns, confined to its worker thread.
pub struct BoardCore {
    name: Name,
    frequency: u64,
    reset_pulse: Duration,
    nmi_pulse: Duration,
    bus: SignalBus,
    clock: ClockGenerator,
    timers: TimerManager,
    devices: Vec<DeviceSlot>,
    next_id: u16,
    state: RunState,
}

impl BoardCore {
    pub fn new(name: Name, config: &BoardConfig) -> Self {
        let bus = match config.trace_depth {
            Some(depth) => SignalBus::new().with_trace(depth),
            None => SignalBus::new(),
        };
        Self {
            name,
            frequency: config.frequency,
            reset_pulse: config.reset_pulse,
            nmi_pulse: config.nmi_pulse,
            bus,
            clock: ClockGenerator::new(),
            timers: TimerManager::new(Arc::clone(&config.time_base)),
            devices: Vec::new(),
            next_id: 0,
            state: RunState::Stop,
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SignalBus {
        &mut self.bus
    }

    pub fn clock(&self) -> &ClockGenerator {
        &self.clock
    }

    /// One master clock step: advance the clock, apply due timers and events,
    /// then tick every device in type order.
    pub fn step(&mut self) {
        self.clock.tick();
        let counter = self.clock.counter();
        self.bus.begin_tick(counter);
        self.poll_timers();

        while let Some(event) = self.clock.pop_due() {
            log::trace!("{}: event {} at {}", self.name, event.label, counter);
            match event.action {
                Deferred::Drive(id, state) => self.bus.set(id, state),
                Deferred::Notify(owner, token) => {
                    match self.devices.iter_mut().find(|slot| slot.id == owner) {
                        Some(slot) => slot.device.on_clock_event(token, &mut self.bus),
                        None => log::warn!("{}: event {} for missing {:?}", self.name, event.label, owner),
                    }
                }
                Deferred::Task(task) => task(&mut self.bus),
            }
        }

        for slot in &mut self.devices {
            let mut clock = DeviceClock::new(&mut self.clock, slot.id);
            slot.tick(counter, &mut clock, &mut self.bus);
        }
    }

    /// Applies one request. Only ever called on the owning thread.
    pub fn handle(&mut self, request: ThreadRequest) {
        log::debug!("{}: {:?}", self.name, request);
        match request {
            ThreadRequest::Run => self.state = RunState::Run,
            ThreadRequest::Stop => self.state = RunState::Stop,
            ThreadRequest::Quit => self.state = RunState::Quit,
            ThreadRequest::ExecuteTask(task) => task(self),
            ThreadRequest::Reset => self.reset(),
            ThreadRequest::NonMaskableInterrupt => self.non_maskable_interrupt(),
            ThreadRequest::Step(n) => {
                for _ in 0..n {
                    self.step();
                }
            }
            ThreadRequest::Query { target, respond } => {
                if respond.send(self.query(target)).is_err() {
                    log::warn!("{}: {:?} caller went away", self.name, target);
                }
            }
        }
    }

    fn reset(&mut self) {
        log::info!("{}: reset", self.name);
        self.clock.reset();
        for slot in &mut self.devices {
            slot.reset();
        }
        self.state = RunState::Run;
        self.pulse(SignalId::Reset, self.reset_pulse, "reset release");
    }

    fn non_maskable_interrupt(&mut self) {
        log::info!("{}: NMI", self.name);
        self.state = RunState::Run;
        self.pulse(SignalId::Nmi, self.nmi_pulse, "nmi release");
    }

    /// Asserts `id` for `width` of real time. A new pulse replaces a pending release.
    fn pulse(&mut self, id: SignalId, width: Duration, label: &'static str) {
        self.timers.cancel(id);
        self.bus.assert_line(id, true);
        self.timers.start(width, id, SignalState::High, label);
    }

    /// Applies expired wall-clock timers. Runs whether or not the board is stepping.
    pub fn poll_timers(&mut self) -> usize {
        self.timers.poll(&mut self.bus)
    }

    /// Registers one device, keeping the list sorted by type.
    pub fn try_add_device(&mut self, device: Box<dyn Device>) -> Result<DeviceId, EmuError> {
        let name = device.name();
        if self.devices.iter().any(|slot| slot.device.name() == name) {
            return Err(EmuError::DuplicateDevice {
                board: self.name,
                device: name,
            });
        }
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        let slot = DeviceSlot::new(id, device, self.frequency);
        log::info!(
            "{}: added {:?} {} (divider {})",
            self.name,
            slot.device.device_type(),
            name,
            slot.divider()
        );
        self.devices.push(slot);
        // Stable, so devices of one type keep registration order.
        self.devices.sort_by_key(|slot| slot.device.device_type());
        Ok(id)
    }

    /// Registers devices, skipping and logging any rejected ones. Returns how many were added.
    pub fn add_devices(&mut self, devices: Vec<Box<dyn Device>>) -> usize {
        let mut added = 0;
        for device in devices {
            match self.try_add_device(device) {
                Ok(_) => added += 1,
                Err(e) => log::warn!("{e}"),
            }
        }
        added
    }

    pub fn set_frequency(&mut self, hz: u64) {
        if hz == 0 {
            log::warn!("{}: ignoring a frequency of 0 Hz", self.name);
            return;
        }
        log::info!("{}: frequency {} Hz", self.name, hz);
        self.frequency = hz;
        for slot in &mut self.devices {
            slot.retune(hz);
        }
    }

    pub fn device_types(&self) -> Vec<DeviceType> {
        self.devices.iter().map(|slot| slot.device.device_type()).collect()
    }

    pub fn device_mut<D: Device + 'static>(&mut self, name: impl Into<Name>) -> Option<&mut D> {
        let name = name.into();
        self.devices
            .iter_mut()
            .find(|slot| slot.device.name() == name)
            .and_then(|slot| slot.device.as_any_mut().downcast_mut::<D>())
    }

    pub fn memory_snapshot(&self) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::default();
        for slot in &self.devices {
            if slot.device.device_type() == DeviceType::Memory {
                if let DeviceState::Memory(blocks) = slot.device.state() {
                    snapshot.merge(blocks);
                }
            }
        }
        snapshot
    }

    pub fn status(&self) -> BoardStatus {
        BoardStatus {
            state: self.state,
            frequency: self.frequency,
            counter: self.clock.counter(),
            elapsed: self.clock.elapsed(),
            pending_events: self.clock.pending(),
            pending_timers: self.timers.pending(),
            devices: self
                .devices
                .iter()
                .map(|slot| DeviceInfo {
                    name: slot.device.name(),
                    kind: slot.device.device_type(),
                    divider: slot.divider(),
                })
                .collect(),
        }
    }

    pub fn query(&self, target: QueryTarget) -> Option<DeviceState> {
        match target {
            QueryTarget::Device(name) => self
                .devices
                .iter()
                .find(|slot| slot.device.name() == name)
                .map(|slot| slot.device.state()),
            QueryTarget::Memory => Some(DeviceState::Memory(self.memory_snapshot())),
            QueryTarget::Status => Some(DeviceState::Board(self.status())),
            QueryTarget::Trace => Some(DeviceState::Trace(self.bus.trace_snapshot())),
        }
    }
}

/// Closes the queue when the worker exits, including by panic, so pending and
/// later requests drop their reply channels instead of waiting forever.
struct CloseOnExit<'a> {
    name: Name,
    queue: &'a CommandQueue<ThreadRequest>,
}

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        let dropped = self.queue.close();
        if !dropped.is_empty() {
            log::warn!("{}: dropped {} unhandled requests", self.name, dropped.len());
        }
    }
}

fn run_loop(mut core: BoardCore, queue: &CommandQueue<ThreadRequest>, idle: Duration) {
    let _close = CloseOnExit {
        name: core.name(),
        queue,
    };
    log::info!("{}: worker started", core.name());
    loop {
        match core.state() {
            RunState::Quit => break,
            RunState::Run => {
                core.step();
                if let Some(request) = queue.try_pop() {
                    core.handle(request);
                }
            }
            RunState::Stop => {
                if let Some(request) = queue.pop_timeout(idle) {
                    core.handle(request);
                }
                core.poll_timers();
            }
        }
    }
    log::info!("{}: worker stopped after {} ticks", core.name(), core.clock().elapsed());
}

/// The OS thread running one board, plus the queue feeding it.
pub struct WorkerThread {
    name: Name,
    queue: Arc<CommandQueue<ThreadRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub fn spawn(name: Name, config: &BoardConfig) -> Result<Self, EmuError> {
        let queue = Arc::new(CommandQueue::new());
        let core = BoardCore::new(name, config);
        let idle = config.idle_wait;
        let handle = {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("board-{name}"))
                .spawn(move || run_loop(core, &queue, idle))
                .map_err(EmuError::ThreadStart)?
        };
        Ok(Self {
            name,
            queue,
            handle: Some(handle),
        })
    }

    pub fn send(&self, request: ThreadRequest) -> Result<(), EmuError> {
        self.queue.push(request).map_err(|request| {
            log::warn!("{}: {:?} sent to a stopped worker", self.name, request);
            EmuError::Disconnected(self.name)
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Sends Quit and waits for the thread to exit.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A closed queue means the loop already exited.
        let _ = self.queue.push(ThreadRequest::Quit);
        if handle.join().is_err() {
            log::error!("{}: worker thread panicked", self.name);
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.join();
    }
}
