//! The tickable device contract and the frequency-divider gate around it.

use std::any::Any;

use super::clock::{DeviceClock, DeviceId};
use super::io::IoState;
use super::memory::MemorySnapshot;
use super::name::Name;
use super::registers::RegisterFile;
use super::signal::{SignalBus, TraceSnapshot};
use super::vcu::VideoFrame;
use super::worker::BoardStatus;

/// Device kinds, in the order they are ticked within one clock step.
///
/// Memory must come after the CPU so it sees the lines the CPU drove this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceType {
    Cpu,
    VideoControlUnit,
    Memory,
    Io,
}

/// A snapshot of some device's state, as returned by a board query.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    Cpu(Box<RegisterFile>),
    Memory(MemorySnapshot),
    Video(Box<VideoFrame>),
    Io(IoState),
    Board(BoardStatus),
    Trace(TraceSnapshot),
}

impl DeviceState {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cpu(_) => "cpu",
            Self::Memory(_) => "memory",
            Self::Video(_) => "video",
            Self::Io(_) => "io",
            Self::Board(_) => "board",
            Self::Trace(_) => "trace",
        }
    }
}

/// Typed extraction from a [`DeviceState`].
pub trait QueryState: Sized {
    const KIND: &'static str;

    fn from_state(state: DeviceState) -> Option<Self>;
}

macro_rules! query_state {
    ($ty:ty, $kind:literal, $variant:ident, boxed) => {
        impl QueryState for $ty {
            const KIND: &'static str = $kind;

            fn from_state(state: DeviceState) -> Option<Self> {
                match state {
                    DeviceState::$variant(inner) => Some(*inner),
                    _ => None,
                }
            }
        }
    };
    ($ty:ty, $kind:literal, $variant:ident) => {
        impl QueryState for $ty {
            const KIND: &'static str = $kind;

            fn from_state(state: DeviceState) -> Option<Self> {
                match state {
                    DeviceState::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

query_state!(RegisterFile, "cpu", Cpu, boxed);
query_state!(VideoFrame, "video", Video, boxed);
query_state!(MemorySnapshot, "memory", Memory);
query_state!(IoState, "io", Io);
query_state!(BoardStatus, "board", Board);
query_state!(TraceSnapshot, "trace", Trace);

/// A unit of hardware on a board.
///
/// Devices never hold a reference to their board; everything they share goes
/// through the bus and the clock passed into [`tick`][Device::tick].
pub trait Device: Send {
    fn name(&self) -> Name;

    fn device_type(&self) -> DeviceType;

    /// The rate this device wants to be ticked at, if slower than the board's clock.
    fn frequency(&self) -> Option<u64> {
        None
    }

    fn tick(&mut self, clock: &mut DeviceClock<'_>, bus: &mut SignalBus);

    /// Returns the device to its power-on state.
    fn reset(&mut self);

    /// Receives a token this device scheduled with [`DeviceClock::schedule_self`].
    fn on_clock_event(&mut self, _token: u32, _bus: &mut SignalBus) {}

    fn state(&self) -> DeviceState;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Smallest shift `d` such that `board_hz >> d` does not exceed `device_hz`.
pub fn divider_for(board_hz: u64, device_hz: u64) -> u32 {
    if device_hz == 0 || device_hz >= board_hz {
        return 0;
    }
    let mut shift = 0;
    while (board_hz >> shift) > device_hz && shift < 63 {
        shift += 1;
    }
    shift
}

/// A registered device plus its divider gate.
pub struct DeviceSlot {
    pub id: DeviceId,
    pub device: Box<dyn Device>,
    divider: u32,
    last_divided: Option<u64>,
}

impl DeviceSlot {
    pub fn new(id: DeviceId, device: Box<dyn Device>, board_hz: u64) -> Self {
        let mut slot = Self {
            id,
            device,
            divider: 0,
            last_divided: None,
        };
        slot.retune(board_hz);
        slot
    }

    pub fn divider(&self) -> u32 {
        self.divider
    }

    pub fn set_divider(&mut self, divider: u32) {
        self.divider = divider;
        self.last_divided = None;
    }

    /// Recomputes the divider after the board frequency changed.
    pub fn retune(&mut self, board_hz: u64) {
        let divider = self
            .device
            .frequency()
            .map_or(0, |hz| divider_for(board_hz, hz));
        self.set_divider(divider);
    }

    /// Forwards to the device only when the divided clock value changed since the last call.
    pub fn tick(&mut self, counter: u64, clock: &mut DeviceClock<'_>, bus: &mut SignalBus) -> bool {
        let divided = counter >> self.divider;
        if self.last_divided == Some(divided) {
            return false;
        }
        self.last_divided = Some(divided);
        self.device.tick(clock, bus);
        true
    }

    pub fn reset(&mut self) {
        self.last_divided = None;
        self.device.reset();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::emu::clock::ClockGenerator;

    /// Counts its ticks; used by board-level tests too.
    pub(crate) struct Counter {
        pub name: Name,
        pub kind: DeviceType,
        pub hz: Option<u64>,
        pub ticks: u64,
    }

    impl Counter {
        pub(crate) fn new(name: &str, kind: DeviceType) -> Self {
            Self {
                name: Name::new(name),
                kind,
                hz: None,
                ticks: 0,
            }
        }
    }

    impl Device for Counter {
        fn name(&self) -> Name {
            self.name
        }

        fn device_type(&self) -> DeviceType {
            self.kind
        }

        fn frequency(&self) -> Option<u64> {
            self.hz
        }

        fn tick(&mut self, _clock: &mut DeviceClock<'_>, _bus: &mut SignalBus) {
            self.ticks += 1;
        }

        fn reset(&mut self) {
            self.ticks = 0;
        }

        fn state(&self) -> DeviceState {
            DeviceState::Io(IoState {
                last_output: self.ticks as u8,
                ..IoState::default()
            })
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_device_type_order() {
        let mut kinds = vec![
            DeviceType::Io,
            DeviceType::Memory,
            DeviceType::Cpu,
            DeviceType::VideoControlUnit,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                DeviceType::Cpu,
                DeviceType::VideoControlUnit,
                DeviceType::Memory,
                DeviceType::Io
            ]
        );
    }

    #[test]
    fn test_divider_for() {
        assert_eq!(divider_for(14_000_000, 7_000_000), 1);
        assert_eq!(divider_for(14_000_000, 3_500_000), 2);
        assert_eq!(divider_for(14_000_000, 14_000_000), 0);
        assert_eq!(divider_for(1_000, 2_000), 0);
    }

    #[test]
    fn test_divider_gates_every_second_clock() {
        let mut slot = DeviceSlot::new(
            DeviceId(0),
            Box::new(Counter::new("half", DeviceType::Io)),
            1,
        );
        slot.set_divider(1);
        let mut clock = ClockGenerator::new();
        let mut bus = SignalBus::new();
        let mut called = Vec::new();
        for _ in 0..8 {
            clock.tick();
            let counter = clock.counter();
            let mut dc = DeviceClock::new(&mut clock, DeviceId(0));
            called.push(slot.tick(counter, &mut dc, &mut bus));
        }
        assert_eq!(called, vec![true, false, true, false, true, false, true, false]);
    }

    #[test]
    fn test_slot_divider_follows_device_frequency() {
        let mut counter = Counter::new("slow", DeviceType::Io);
        counter.hz = Some(3_500_000);
        let slot = DeviceSlot::new(DeviceId(1), Box::new(counter), 14_000_000);
        assert_eq!(slot.divider(), 2);
    }
}
