//! The ULA port: keyboard matrix in, border/MIC/EAR out, on every even port address.

use std::any::Any;

use super::clock::DeviceClock;
use super::device::{Device, DeviceState, DeviceType};
use super::name::Name;
use super::signal::{SignalBus, SignalId};

/// Key labels per half-row, bit 0 first. Half-row `n` is selected by A(8+n) Low.
pub const KEYBOARD: [[&str; 5]; 8] = [
    ["CAPS", "Z", "X", "C", "V"],
    ["A", "S", "D", "F", "G"],
    ["Q", "W", "E", "R", "T"],
    ["1", "2", "3", "4", "5"],
    ["0", "9", "8", "7", "6"],
    ["P", "O", "I", "U", "Y"],
    ["ENTER", "L", "K", "J", "H"],
    ["SPACE", "SYM", "M", "N", "B"],
];

/// Half-row and bit for a key label, case-insensitive.
pub fn key_position(label: &str) -> Option<(usize, u8)> {
    KEYBOARD.iter().enumerate().find_map(|(row, keys)| {
        keys.iter()
            .position(|k| k.eq_ignore_ascii_case(label))
            .map(|bit| (row, bit as u8))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoState {
    /// Last byte written to the port.
    pub last_output: u8,
    pub border: u8,
    pub mic: bool,
    pub ear_out: bool,
    /// Tape input level, reported in bit 6 on reads.
    pub ear_in: bool,
    /// Pressed keys per half-row, one bit per key.
    pub keys: [u8; 8],
}

pub struct IoPort {
    name: Name,
    state: IoState,
    driving: bool,
}

impl IoPort {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            state: IoState::default(),
            driving: false,
        }
    }

    pub fn io_state(&self) -> &IoState {
        &self.state
    }

    fn set_key(&mut self, label: &str, pressed: bool) -> bool {
        let Some((row, bit)) = key_position(label) else {
            log::warn!("{}: no key called {label:?}", self.name);
            return false;
        };
        if pressed {
            self.state.keys[row] |= 1 << bit;
        } else {
            self.state.keys[row] &= !(1 << bit);
        }
        true
    }

    pub fn press(&mut self, label: &str) -> bool {
        self.set_key(label, true)
    }

    pub fn release(&mut self, label: &str) -> bool {
        self.set_key(label, false)
    }

    pub fn release_all(&mut self) {
        self.state.keys = [0; 8];
    }

    pub fn set_ear(&mut self, level: bool) {
        self.state.ear_in = level;
    }

    /// The byte a read from `port` sees.
    pub fn read_port(&self, port: u16) -> u8 {
        let rows = (port >> 8) as u8;
        let pressed = (0..8)
            .filter(|row| rows & (1 << row) == 0)
            .fold(0u8, |acc, row| acc | self.state.keys[row]);
        let ear = if self.state.ear_in { 0x40 } else { 0x00 };
        0xA0 | ear | (!pressed & 0x1F)
    }

    fn write_port(&mut self, value: u8) {
        self.state.last_output = value;
        self.state.border = value & 0x07;
        self.state.mic = value & 0x08 != 0;
        self.state.ear_out = value & 0x10 != 0;
        log::trace!("{}: out {:#04X}", self.name, value);
    }
}

impl Device for IoPort {
    fn name(&self) -> Name {
        self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Io
    }

    fn tick(&mut self, _clock: &mut DeviceClock<'_>, bus: &mut SignalBus) {
        let port = bus.address();
        let selected = bus.active(SignalId::Iorq) && !bus.active(SignalId::M1) && port & 1 == 0;
        if selected && bus.active(SignalId::Rd) {
            bus.set_data(self.read_port(port));
            self.driving = true;
            return;
        }
        if self.driving {
            bus.release_data();
            self.driving = false;
        }
        if selected && bus.active(SignalId::Wr) {
            self.write_port(bus.data());
        }
    }

    fn reset(&mut self) {
        let keys = self.state.keys;
        self.state = IoState {
            keys,
            ..IoState::default()
        };
        self.driving = false;
    }

    fn state(&self) -> DeviceState {
        DeviceState::Io(self.state.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
