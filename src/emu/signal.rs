//! The electrical signal bus shared by every device on a board.

use std::collections::VecDeque;
use std::fmt;

use super::name::Name;

/// The electrical state of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalState {
    Low,
    High,
    /// Nobody is driving the line.
    #[default]
    HighImpedance,
}

impl SignalState {
    /// Logical 1 is `High`.
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Self::High
        } else {
            Self::Low
        }
    }
}

/// A named line: the value as of the prior write and the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signal {
    pub previous: SignalState,
    pub current: SignalState,
}

impl Signal {
    fn idle(state: SignalState) -> Self {
        Self {
            previous: state,
            current: state,
        }
    }
}

macro_rules! signals {
    ($($id:ident = $label:literal),* $(,)?) => {
        /// Every line on the Z80 side of the board.
        ///
        /// Control lines are active-Low, as printed on the chip.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum SignalId {
            $($id,)*
        }

        impl SignalId {
            pub const ALL: &'static [SignalId] = &[$(SignalId::$id,)*];
            pub const COUNT: usize = Self::ALL.len();

            pub fn label(self) -> &'static str {
                match self {
                    $(SignalId::$id => $label,)*
                }
            }
        }
    };
}

signals! {
    A0 = "A0", A1 = "A1", A2 = "A2", A3 = "A3", A4 = "A4", A5 = "A5", A6 = "A6", A7 = "A7",
    A8 = "A8", A9 = "A9", A10 = "A10", A11 = "A11", A12 = "A12", A13 = "A13", A14 = "A14", A15 = "A15",
    D0 = "D0", D1 = "D1", D2 = "D2", D3 = "D3", D4 = "D4", D5 = "D5", D6 = "D6", D7 = "D7",
    M1 = "M1", Mreq = "MREQ", Iorq = "IORQ", Rd = "RD", Wr = "WR", Rfsh = "RFSH",
    Halt = "HALT", Wait = "WAIT", Int = "INT", Nmi = "NMI", Reset = "RESET",
    BusRq = "BUSRQ", BusAck = "BUSAK",
}

impl SignalId {
    /// Resolves a raw index. Out-of-range indices are a programming error.
    pub fn from_index(index: usize) -> Self {
        debug_assert!(index < Self::COUNT, "signal index {index} out of range");
        Self::ALL[index]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn address(bit: usize) -> Self {
        debug_assert!(bit < 16);
        Self::from_index(SignalId::A0.index() + bit)
    }

    pub fn data(bit: usize) -> Self {
        debug_assert!(bit < 8);
        Self::from_index(SignalId::D0.index() + bit)
    }

    pub fn is_address(self) -> bool {
        (SignalId::A0..=SignalId::A15).contains(&self)
    }

    pub fn is_data(self) -> bool {
        (SignalId::D0..=SignalId::D7).contains(&self)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// One recorded signal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub tick: u64,
    pub signal: SignalId,
    pub state: SignalState,
}

/// Bounded history of bus writes, for oscillogram-style views. Diagnostic only.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    depth: usize,
    entries: VecDeque<TraceEntry>,
}

impl TraceRecorder {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            entries: VecDeque::with_capacity(depth.min(4096)),
        }
    }

    fn record(&mut self, entry: TraceEntry) {
        if self.depth == 0 {
            return;
        }
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Point-in-time copy of the trace recorder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSnapshot {
    pub entries: Vec<TraceEntry>,
}

/// Fixed table of lines plus edge detection and word accessors.
pub struct SignalBus {
    signals: [Signal; SignalId::COUNT],
    tick: u64,
    trace: Option<TraceRecorder>,
}

impl SignalBus {
    /// Creates a bus with every control line released (High) and the
    /// address and data lines floating.
    pub fn new() -> Self {
        let mut signals = [Signal::idle(SignalState::HighImpedance); SignalId::COUNT];
        for &id in SignalId::ALL {
            if !id.is_address() && !id.is_data() {
                signals[id.index()] = Signal::idle(SignalState::High);
            }
        }
        Self {
            signals,
            tick: 0,
            trace: None,
        }
    }

    pub fn with_trace(mut self, depth: usize) -> Self {
        self.trace = Some(TraceRecorder::new(depth));
        self
    }

    /// Tags subsequent trace entries with the given clock counter.
    pub fn begin_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn signal(&self, id: SignalId) -> Signal {
        self.signals[id.index()]
    }

    pub fn get(&self, id: SignalId) -> SignalState {
        self.signals[id.index()].current
    }

    /// Shifts the current state into `previous`, then writes `state`.
    pub fn set(&mut self, id: SignalId, state: SignalState) {
        let signal = &mut self.signals[id.index()];
        signal.previous = signal.current;
        signal.current = state;
        if let Some(trace) = self.trace.as_mut() {
            trace.record(TraceEntry {
                tick: self.tick,
                signal: id,
                state,
            });
        }
    }

    /// Drives an active-Low control line: `true` asserts it.
    pub fn assert_line(&mut self, id: SignalId, asserted: bool) {
        self.set(id, SignalState::from_bit(!asserted));
    }

    /// Is the line at `level`? Control lines are active-Low, so `Low` is the usual level.
    pub fn active_at(&self, id: SignalId, level: SignalState) -> bool {
        self.get(id) == level
    }

    pub fn active(&self, id: SignalId) -> bool {
        self.active_at(id, SignalState::Low)
    }

    pub fn positive_edge(&self, id: SignalId) -> bool {
        let s = self.signal(id);
        s.previous == SignalState::Low && s.current == SignalState::High
    }

    pub fn negative_edge(&self, id: SignalId) -> bool {
        let s = self.signal(id);
        s.previous == SignalState::High && s.current == SignalState::Low
    }

    /// Drives all sixteen address lines.
    pub fn set_address(&mut self, value: u16) {
        for bit in 0..16 {
            self.set(SignalId::address(bit), SignalState::from_bit(value >> bit & 1 == 1));
        }
    }

    /// Reads the address lines. A floating line reads as 1.
    pub fn address(&self) -> u16 {
        (0..16).fold(0u16, |acc, bit| {
            let high = self.get(SignalId::address(bit)) != SignalState::Low;
            acc | (u16::from(high) << bit)
        })
    }

    pub fn set_data(&mut self, value: u8) {
        for bit in 0..8 {
            self.set(SignalId::data(bit), SignalState::from_bit(value >> bit & 1 == 1));
        }
    }

    /// Reads the data lines. A floating line reads as 1, the pull-up value.
    pub fn data(&self) -> u8 {
        (0..8).fold(0u8, |acc, bit| {
            let high = self.get(SignalId::data(bit)) != SignalState::Low;
            acc | (u8::from(high) << bit)
        })
    }

    pub fn release_data(&mut self) {
        for bit in 0..8 {
            self.set(SignalId::data(bit), SignalState::HighImpedance);
        }
    }

    pub fn release_address(&mut self) {
        for bit in 0..16 {
            self.set(SignalId::address(bit), SignalState::HighImpedance);
        }
    }

    pub fn data_floating(&self) -> bool {
        (0..8).all(|bit| self.get(SignalId::data(bit)) == SignalState::HighImpedance)
    }

    pub fn lookup(&self, name: Name) -> Option<SignalId> {
        SignalId::ALL.iter().copied().find(|id| Name::new(id.label()) == name)
    }

    pub fn trace_snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            entries: self
                .trace
                .as_ref()
                .map(|t| t.entries().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Puts every line back to its power-on state. The trace recorder is kept but emptied.
    pub fn reset(&mut self) {
        let trace = self.trace.take().map(|mut t| {
            t.clear();
            t
        });
        *self = Self::new();
        self.trace = trace;
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
