//! The one modelled board layout: a 48K Spectrum.

use std::path::Path;

use crate::emu::cpu::Z80;
use crate::emu::device::Device;
use crate::emu::io::IoPort;
use crate::emu::memory::Memory;
use crate::emu::vcu::Vcu;
use crate::emu::EmuError;

pub const BOARD: &str = "spectrum";
pub const CPU: &str = "z80";
pub const VCU: &str = "vcu";
pub const ROM: &str = "rom";
pub const RAM: &str = "ram";
pub const ULA: &str = "ula";

/// Master crystal. The CPU and the video unit both run off half of it.
pub const CRYSTAL_HZ: u64 = 14_000_000;
pub const HALF_CLOCK_HZ: u64 = 7_000_000;

/// Z80, video unit, 16K ROM at 0x0000, 48K RAM at 0x4000 and the ULA port.
pub fn spectrum_48k(rom_image: Option<&Path>) -> Result<Vec<Box<dyn Device>>, EmuError> {
    let mut rom = Memory::rom(ROM, 0x0000, 0x4000);
    if let Some(path) = rom_image {
        rom.load(path)?;
    }
    Ok(vec![
        Box::new(Z80::new(CPU).with_frequency(HALF_CLOCK_HZ)),
        Box::new(Vcu::new(VCU).with_frequency(Some(HALF_CLOCK_HZ))),
        Box::new(rom),
        Box::new(Memory::ram(RAM, 0x4000, 0xC000)),
        Box::new(IoPort::new(ULA)),
    ])
}
