//! Boards and the motherboard that routes commands and queries to them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use super::device::{Device, DeviceState, QueryState};
use super::memory::MemorySnapshot;
use super::name::Name;
use super::signal::TraceSnapshot;
use super::timer::{TimeBase, WallClock};
use super::worker::{BoardCore, BoardStatus, QueryTarget, ThreadRequest, WorkerThread};
use super::EmuError;

/// Per-board settings.
#[derive(Clone)]
pub struct BoardConfig {
    /// Master clock in Hz.
    pub frequency: u64,
    pub reset_pulse: Duration,
    pub nmi_pulse: Duration,
    /// How long a stopped worker waits for a command before looping.
    pub idle_wait: Duration,
    /// Signal trace ring size, if tracing is wanted.
    pub trace_depth: Option<usize>,
    pub time_base: Arc<dyn TimeBase>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            frequency: 14_000_000,
            reset_pulse: Duration::from_millis(2),
            nmi_pulse: Duration::from_millis(1),
            idle_wait: Duration::from_millis(5),
            trace_depth: None,
            time_base: Arc::new(WallClock::new()),
        }
    }
}

impl fmt::Debug for BoardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardConfig")
            .field("frequency", &self.frequency)
            .field("reset_pulse", &self.reset_pulse)
            .field("nmi_pulse", &self.nmi_pulse)
            .field("idle_wait", &self.idle_wait)
            .field("trace_depth", &self.trace_depth)
            .finish_non_exhaustive()
    }
}

impl BoardConfig {
    pub fn with_frequency(mut self, hz: u64) -> Self {
        self.frequency = hz;
        self
    }

    pub fn with_reset_pulse(mut self, width: Duration) -> Self {
        self.reset_pulse = width;
        self
    }

    pub fn with_nmi_pulse(mut self, width: Duration) -> Self {
        self.nmi_pulse = width;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    pub fn with_trace(mut self, depth: usize) -> Self {
        self.trace_depth = Some(depth);
        self
    }

    pub fn with_time_base(mut self, time_base: Arc<dyn TimeBase>) -> Self {
        self.time_base = time_base;
        self
    }
}

/// Index of a board in its [`Motherboard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardId(pub usize);

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named, independently clocked board and the thread that runs it.
pub struct Board {
    name: Name,
    id: BoardId,
    frequency: u64,
    worker: WorkerThread,
}

impl Board {
    fn new(name: Name, id: BoardId, config: &BoardConfig) -> Result<Self, EmuError> {
        let worker = WorkerThread::spawn(name, config)?;
        Ok(Self {
            name,
            id,
            frequency: config.frequency,
            worker,
        })
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn id(&self) -> BoardId {
        self.id
    }

    /// The last frequency requested through the motherboard.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }

    /// Fails with [`EmuError::Disconnected`] once the worker has exited.
    pub fn send(&self, request: ThreadRequest) -> Result<(), EmuError> {
        self.worker.send(request)
    }

    /// Blocking round trip through the command queue on a fresh one-shot channel.
    pub fn query(&self, target: QueryTarget) -> Result<Option<DeviceState>, EmuError> {
        let (respond, reply) = oneshot::channel();
        self.send(ThreadRequest::Query { target, respond })?;
        reply
            .blocking_recv()
            .map_err(|_| EmuError::Disconnected(self.name))
    }

    /// Runs `f` on the worker thread and waits for its result.
    pub fn inspect<R, F>(&self, f: F) -> Result<R, EmuError>
    where
        R: Send + 'static,
        F: FnOnce(&mut BoardCore) -> R + Send + 'static,
    {
        let (respond, reply) = oneshot::channel();
        self.send(ThreadRequest::ExecuteTask(Box::new(move |core| {
            // The caller may have given up waiting; nothing to do then.
            let _ = respond.send(f(core));
        })))?;
        reply
            .blocking_recv()
            .map_err(|_| EmuError::Disconnected(self.name))
    }

    fn shutdown(&mut self) {
        self.worker.join();
    }
}

/// Registry of boards, indexed by [`BoardId`] and looked up by name.
#[derive(Default)]
pub struct Motherboard {
    boards: Vec<Board>,
    by_name: FxHashMap<Name, BoardId>,
}

impl Motherboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a board and starts its worker. Adding an existing name returns the existing board.
    pub fn add_board(&mut self, name: impl Into<Name>, config: &BoardConfig) -> Result<BoardId, EmuError> {
        let name = name.into();
        if let Some(&id) = self.by_name.get(&name) {
            log::warn!("board {name} already exists as {id}");
            return Ok(id);
        }
        let id = BoardId(self.boards.len());
        let board = Board::new(name, id, config).map_err(|e| {
            log::error!("board {name}: {e}");
            e
        })?;
        log::info!("board {name} started as {id} at {} Hz", config.frequency);
        self.boards.push(board);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn board_id(&self, name: impl Into<Name>) -> Option<BoardId> {
        self.by_name.get(&name.into()).copied()
    }

    pub fn board(&self, id: BoardId) -> Result<&Board, EmuError> {
        self.boards.get(id.0).ok_or(EmuError::UnknownBoard(id))
    }

    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.iter()
    }

    fn send(&self, id: BoardId, request: ThreadRequest) -> Result<(), EmuError> {
        self.board(id)?.send(request)
    }

    /// Hands devices to the board's thread and optionally retunes it. Fire-and-forget.
    pub fn add_devices(
        &mut self,
        id: BoardId,
        devices: Vec<Box<dyn Device>>,
        frequency: Option<u64>,
    ) -> Result<(), EmuError> {
        if let Some(hz) = frequency {
            self.set_frequency(id, hz)?;
        }
        self.execute(id, move |core| {
            core.add_devices(devices);
        })
    }

    pub fn set_frequency(&mut self, id: BoardId, hz: u64) -> Result<(), EmuError> {
        let board = self.boards.get_mut(id.0).ok_or(EmuError::UnknownBoard(id))?;
        board.frequency = hz;
        board.send(ThreadRequest::ExecuteTask(Box::new(move |core| core.set_frequency(hz))))
    }

    pub fn execute(&self, id: BoardId, task: impl FnOnce(&mut BoardCore) + Send + 'static) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::ExecuteTask(Box::new(task)))
    }

    pub fn reset(&self, id: BoardId) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::Reset)
    }

    pub fn non_maskable_interrupt(&self, id: BoardId) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::NonMaskableInterrupt)
    }

    pub fn run(&self, id: BoardId) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::Run)
    }

    pub fn stop(&self, id: BoardId) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::Stop)
    }

    pub fn step(&self, id: BoardId, ticks: u64) -> Result<(), EmuError> {
        self.send(id, ThreadRequest::Step(ticks))
    }

    /// Synchronous access to a board's internals from its own thread.
    pub fn inspect<R, F>(&self, id: BoardId, f: F) -> Result<R, EmuError>
    where
        R: Send + 'static,
        F: FnOnce(&mut BoardCore) -> R + Send + 'static,
    {
        self.board(id)?.inspect(f)
    }

    /// Runs `f` against a device of concrete type `D` on its board's thread.
    pub fn with_device<D, R, F>(&self, id: BoardId, device: impl Into<Name>, f: F) -> Result<R, EmuError>
    where
        D: Device + 'static,
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        let device = device.into();
        let board = self.board(id)?;
        board
            .inspect(move |core| core.device_mut::<D>(device).map(f))?
            .ok_or(EmuError::UnknownDevice {
                board: board.name(),
                device,
            })
    }

    /// Typed device query that reports failures.
    pub fn try_get_state<T: QueryState>(&self, id: BoardId, device: impl Into<Name>) -> Result<T, EmuError> {
        let device = device.into();
        let board = self.board(id)?;
        let state = board
            .query(QueryTarget::Device(device))?
            .ok_or(EmuError::UnknownDevice {
                board: board.name(),
                device,
            })?;
        let actual = state.kind();
        T::from_state(state).ok_or(EmuError::StateMismatch {
            expected: T::KIND,
            actual,
        })
    }

    /// Typed device query. Any failure is logged and yields `T::default()`.
    pub fn get_state<T: QueryState + Default>(&self, id: BoardId, device: impl Into<Name>) -> T {
        self.try_get_state(id, device).unwrap_or_else(|e| {
            log::warn!("get_state on {id}: {e}");
            T::default()
        })
    }

    fn query_target<T: QueryState>(&self, id: BoardId, target: QueryTarget) -> Result<T, EmuError> {
        let state = self.board(id)?.query(target)?;
        let actual = state.as_ref().map_or("nothing", DeviceState::kind);
        state.and_then(T::from_state).ok_or(EmuError::StateMismatch {
            expected: T::KIND,
            actual,
        })
    }

    pub fn status(&self, id: BoardId) -> Result<BoardStatus, EmuError> {
        self.query_target(id, QueryTarget::Status)
    }

    pub fn memory_snapshot(&self, id: BoardId) -> Result<MemorySnapshot, EmuError> {
        self.query_target(id, QueryTarget::Memory)
    }

    pub fn trace(&self, id: BoardId) -> Result<TraceSnapshot, EmuError> {
        self.query_target(id, QueryTarget::Trace)
    }

    /// Quits and joins every board's thread.
    pub fn shutdown(&mut self) {
        for board in &mut self.boards {
            board.shutdown();
        }
    }
}

impl Drop for Motherboard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::cpu::Z80;
    use crate::emu::device::tests::Counter;
    use crate::emu::device::DeviceType;
    use crate::emu::io::{IoPort, IoState};
    use crate::emu::memory::Memory;
    use crate::emu::registers::RegisterFile;
    use crate::emu::signal::SignalId;
    use crate::emu::timer::ManualClock;
    use crate::emu::worker::RunState;

    fn config() -> BoardConfig {
        BoardConfig::default()
            .with_time_base(ManualClock::new())
            .with_idle_wait(Duration::from_millis(1))
    }

    #[test]
    fn test_add_board_is_idempotent_by_name() {
        let mut mb = Motherboard::new();
        let a = mb.add_board("alpha", &config()).unwrap();
        let again = mb.add_board("alpha", &config()).unwrap();
        let b = mb.add_board("beta", &config()).unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(mb.boards().count(), 2);
        assert_eq!(mb.board_id("beta"), Some(b));
        assert!(matches!(mb.board(BoardId(9)), Err(EmuError::UnknownBoard(_))));
    }

    #[test]
    fn test_board_isolation() {
        let time = ManualClock::new();
        let config_a = config().with_time_base(time.clone());
        let mut mb = Motherboard::new();
        let a = mb.add_board("iso-a", &config_a).unwrap();
        let b = mb.add_board("iso-b", &config()).unwrap();
        mb.add_devices(a, vec![Box::new(Counter::new("count", DeviceType::Io))], None)
            .unwrap();
        mb.add_devices(b, vec![Box::new(Counter::new("count", DeviceType::Io))], None)
            .unwrap();

        mb.step(a, 100).unwrap();
        mb.reset(a).unwrap();
        mb.stop(a).unwrap();
        mb.step(a, 3).unwrap();

        // Reset puts A into Run until the Stop arrives, so its exact count varies.
        let a_status = mb.status(a).unwrap();
        let b_status = mb.status(b).unwrap();
        assert!(a_status.elapsed >= 3);
        assert_eq!(a_status.state, RunState::Stop);
        assert_eq!(b_status.elapsed, 0);
        assert_eq!(b_status.state, RunState::Stop);
        // No time has passed on A's time base yet.
        assert!(mb.inspect(a, |core| core.bus().active(SignalId::Reset)).unwrap());
        assert!(!mb.inspect(b, |core| core.bus().active(SignalId::Reset)).unwrap());
        assert_eq!(mb.get_state::<IoState>(b, "count").last_output, 0);

        // The pulse ends on time even though A is stopped.
        let elapsed = a_status.elapsed;
        time.advance(Duration::from_millis(2));
        let mut released = false;
        for _ in 0..200 {
            if !mb.inspect(a, |core| core.bus().active(SignalId::Reset)).unwrap() {
                released = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(released);
        assert_eq!(mb.status(a).unwrap().elapsed, elapsed);
    }

    #[test]
    fn test_dead_board_reports_disconnected() {
        let mut mb = Motherboard::new();
        let id = mb.add_board("crash", &config()).unwrap();
        mb.execute(id, |_| panic!("device exploded")).unwrap();
        assert!(matches!(mb.status(id), Err(EmuError::Disconnected(_))));
        assert!(matches!(
            mb.inspect(id, |core| core.state()),
            Err(EmuError::Disconnected(_))
        ));
        assert!(matches!(mb.run(id), Err(EmuError::Disconnected(_))));
    }

    #[test]
    fn test_typed_queries() {
        let mut mb = Motherboard::new();
        let id = mb.add_board("typed", &config()).unwrap();
        let mut rom = Memory::rom("rom", 0, 0x4000);
        rom.load_bytes(&[0x3E, 0x12, 0x76]);
        mb.add_devices(
            id,
            vec![
                Box::new(rom),
                Box::new(Memory::ram("ram", 0x4000, 0xC000)),
                Box::new(Z80::new("z80").with_frequency(7_000_000)),
                Box::new(IoPort::new("ula")),
            ],
            Some(14_000_000),
        )
        .unwrap();
        mb.step(id, 200).unwrap();

        let regs: RegisterFile = mb.get_state(id, "z80");
        assert_eq!(regs.a(), 0x12);
        assert!(regs.halted);

        assert!(matches!(
            mb.try_get_state::<RegisterFile>(id, "ula"),
            Err(EmuError::StateMismatch {
                expected: "cpu",
                actual: "io"
            })
        ));
        assert_eq!(mb.get_state::<RegisterFile>(id, "ula"), RegisterFile::default());
        assert!(matches!(
            mb.try_get_state::<IoState>(id, "nope"),
            Err(EmuError::UnknownDevice { .. })
        ));

        let snapshot = mb.memory_snapshot(id).unwrap();
        assert_eq!(snapshot.blocks.len(), 2);
        assert_eq!(snapshot.read(0x0001), Some(0x12));
        assert_eq!(snapshot.flatten()[0x4000], 0);

        let status = mb.status(id).unwrap();
        assert_eq!(status.frequency, 14_000_000);
        assert_eq!(status.devices.len(), 4);
        assert_eq!(status.devices[0].kind, DeviceType::Cpu);
        assert_eq!(status.devices[0].divider, 1);
    }

    #[test]
    fn test_with_device_pokes_memory() {
        let mut mb = Motherboard::new();
        let id = mb.add_board("poke", &config()).unwrap();
        mb.add_devices(id, vec![Box::new(Memory::ram("ram", 0x4000, 0x100))], None)
            .unwrap();
        assert!(mb
            .with_device(id, "ram", |ram: &mut Memory| ram.poke(0x4010, 0xAB))
            .unwrap());
        assert_eq!(mb.memory_snapshot(id).unwrap().read(0x4010), Some(0xAB));
        assert!(matches!(
            mb.with_device(id, "ram", |_: &mut Z80| ()),
            Err(EmuError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_trace_query() {
        let mut mb = Motherboard::new();
        let id = mb.add_board("traced", &config().with_trace(64)).unwrap();
        mb.non_maskable_interrupt(id).unwrap();
        mb.stop(id).unwrap();
        let trace = mb.trace(id).unwrap();
        assert!(trace
            .entries
            .iter()
            .any(|e| e.signal == SignalId::Nmi));
    }
}
