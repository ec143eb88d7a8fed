use std::any::Any;
use std::path::Path;

use super::clock::DeviceClock;
use super::device::{Device, DeviceState, DeviceType};
use super::name::Name;
use super::signal::{SignalBus, SignalId};
use super::EmuError;

pub const ADDRESS_SPACE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Rom,
    Ram,
}

/// One block of a memory snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub device: Name,
    pub block: Name,
    pub base: u16,
    pub bytes: Vec<u8>,
}

/// Point-in-time copy of one or more memory devices, in board order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub blocks: Vec<MemoryBlock>,
}

impl MemorySnapshot {
    pub fn merge(&mut self, other: MemorySnapshot) {
        self.blocks.extend(other.blocks);
    }

    /// Reconstructs the flat 64K address space.
    ///
    /// Blocks are copied in order, so where two overlap the later one wins.
    /// Unmapped addresses read 0xFF and bytes placed past 0xFFFF are dropped.
    pub fn flatten(&self) -> Vec<u8> {
        let mut flat = vec![0xFF; ADDRESS_SPACE];
        for block in &self.blocks {
            let start = usize::from(block.base);
            let end = (start + block.bytes.len()).min(ADDRESS_SPACE);
            if end - start < block.bytes.len() {
                log::trace!(
                    "{}/{}: dropping {} bytes past the top of memory",
                    block.device,
                    block.block,
                    block.bytes.len() - (end - start)
                );
            }
            flat[start..end].copy_from_slice(&block.bytes[..end - start]);
        }
        flat
    }

    /// The byte visible at `addr`, honouring the same overlap rule as [`flatten`][Self::flatten].
    pub fn read(&self, addr: u16) -> Option<u8> {
        self.blocks.iter().rev().find_map(|block| {
            let offset = usize::from(addr.wrapping_sub(block.base));
            (addr >= block.base).then(|| block.bytes.get(offset).copied()).flatten()
        })
    }
}

/// A ROM or RAM chip decoded at a fixed placement address.
pub struct Memory {
    name: Name,
    kind: MemoryKind,
    base: u16,
    data: Box<[u8]>,
    /// This device put a value on the data bus and has not released it yet.
    driving: bool,
}

impl Memory {
    pub fn new(name: impl Into<Name>, kind: MemoryKind, base: u16, size: usize) -> Self {
        let size = size.min(ADDRESS_SPACE - usize::from(base));
        Self {
            name: name.into(),
            kind,
            base,
            data: vec![0u8; size].into_boxed_slice(),
            driving: false,
        }
    }

    pub fn rom(name: impl Into<Name>, base: u16, size: usize) -> Self {
        Self::new(name, MemoryKind::Rom, base, size)
    }

    pub fn ram(name: impl Into<Name>, base: u16, size: usize) -> Self {
        Self::new(name, MemoryKind::Ram, base, size)
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, addr: u16) -> Option<usize> {
        let offset = usize::from(addr.checked_sub(self.base)?);
        (offset < self.data.len()).then_some(offset)
    }

    pub fn contains(&self, addr: u16) -> bool {
        self.offset(addr).is_some()
    }

    /// Reads a binary image from disk into the block. See [`load_bytes`][Self::load_bytes].
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize, EmuError> {
        let path = path.as_ref();
        let image = std::fs::read(path)?;
        let copied = self.load_bytes(&image);
        log::info!("{}: loaded {} bytes from {}", self.name, copied, path.display());
        Ok(copied)
    }

    /// Copies an image to the start of the block, truncated or zero-padded to capacity.
    pub fn load_bytes(&mut self, image: &[u8]) -> usize {
        let copied = image.len().min(self.data.len());
        if copied < image.len() {
            log::warn!(
                "{}: image is {} bytes, truncated to {}",
                self.name,
                image.len(),
                copied
            );
        }
        self.data[..copied].copy_from_slice(&image[..copied]);
        self.data[copied..].fill(0);
        copied
    }

    pub fn peek(&self, addr: u16) -> Option<u8> {
        self.offset(addr).map(|offset| self.data[offset])
    }

    /// Writes a byte regardless of kind. Returns false outside the block.
    pub fn poke(&mut self, addr: u16, value: u8) -> bool {
        match self.offset(addr) {
            Some(offset) => {
                self.data[offset] = value;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let block = match self.kind {
            MemoryKind::Rom => "rom",
            MemoryKind::Ram => "ram",
        };
        MemorySnapshot {
            blocks: vec![MemoryBlock {
                device: self.name,
                block: Name::new(block),
                base: self.base,
                bytes: self.data.to_vec(),
            }],
        }
    }
}

impl Device for Memory {
    fn name(&self) -> Name {
        self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Memory
    }

    fn tick(&mut self, _clock: &mut DeviceClock<'_>, bus: &mut SignalBus) {
        let offset = if bus.active(SignalId::Mreq) && !bus.active(SignalId::Rfsh) {
            self.offset(bus.address())
        } else {
            None
        };

        match offset {
            Some(offset) if bus.active(SignalId::Rd) => {
                bus.set_data(self.data[offset]);
                self.driving = true;
            }
            _ => {
                if self.driving {
                    bus.release_data();
                    self.driving = false;
                }
                if let Some(offset) = offset.filter(|_| bus.active(SignalId::Wr)) {
                    match self.kind {
                        MemoryKind::Ram => self.data[offset] = bus.data(),
                        MemoryKind::Rom => log::trace!("{}: write to ROM ignored", self.name),
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        // Contents survive a reset, like the real chips.
        self.driving = false;
    }

    fn state(&self) -> DeviceState {
        DeviceState::Memory(self.snapshot())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
