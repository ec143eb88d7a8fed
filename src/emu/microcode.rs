use crate::plat::{opcode_table, Instruction, Prefix, Reg8, RegPair};

use super::alu::{self, AluMode};
use super::registers::RegisterFile;
use super::EmuError;

/// Where a bus cycle takes its address from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    /// The program counter; it is bumped once the read completes.
    Pc,
    Hl,
    Wz,
    /// Pre-decrements SP.
    PushSp,
    /// Post-increments SP.
    PopSp,
    /// The IM 2 vector pointer plus an offset.
    Vector(u8),
}

/// Where a read lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dst {
    Reg(Reg8),
    PairLo(RegPair),
    PairHi(RegPair),
    Z,
    W,
}

/// What a write puts on the data bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Src {
    Reg(Reg8),
    PcHi,
    PcLo,
}

/// Register transfer applied when a micro-op's bus cycle completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Then {
    #[default]
    Next,
    /// PC <- WZ
    JumpWz,
    /// PC <- address
    Jump(u16),
}

/// One machine cycle worth of bus activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusCycle {
    MemRead { addr: Addr, dst: Dst },
    MemWrite { addr: Addr, src: Src },
    /// Port address comes from WZ.
    IoRead { dst: Dst },
    IoWrite { src: Src },
    /// M1 with IORQ: reads the interrupt response byte.
    InterruptAck,
    /// No bus activity for the given number of half-clocks.
    Internal { half_clocks: u8 },
}

/// Micro-operations queued by an instruction after its opcode fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MicroOp {
    pub cycle: BusCycle,
    pub then: Then,
}

impl MicroOp {
    pub fn new(cycle: BusCycle) -> Self {
        Self {
            cycle,
            then: Then::Next,
        }
    }

    pub fn then(mut self, then: Then) -> Self {
        self.then = then;
        self
    }

    fn read(addr: Addr, dst: Dst) -> Self {
        Self::new(BusCycle::MemRead { addr, dst })
    }

    fn write(addr: Addr, src: Src) -> Self {
        Self::new(BusCycle::MemWrite { addr, src })
    }

    fn internal(half_clocks: u8) -> Self {
        Self::new(BusCycle::Internal { half_clocks })
    }
}

pub const PIPELINE_DEPTH: usize = 8;

/// Fixed-depth circular queue of pending micro-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipeline {
    slots: [Option<MicroOp>; PIPELINE_DEPTH],
    head: usize,
    len: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            slots: [None; PIPELINE_DEPTH],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, op: MicroOp) -> Result<(), EmuError> {
        if self.len == PIPELINE_DEPTH {
            return Err(EmuError::PipelineFull);
        }
        self.slots[(self.head + self.len) % PIPELINE_DEPTH] = Some(op);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<MicroOp> {
        if self.len == 0 {
            return None;
        }
        let op = self.slots[self.head].take();
        self.head = (self.head + 1) % PIPELINE_DEPTH;
        self.len -= 1;
        op
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an instruction may touch when it executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuState {
    pub regs: RegisterFile,
    pub pipeline: Pipeline,
    pub prefix: Prefix,
    /// Set by EI; blocks INT acceptance until one more instruction has run.
    pub ei_pending: bool,
}

impl CpuState {
    fn queue(&mut self, ops: &[MicroOp]) {
        for &op in ops {
            if let Err(e) = self.pipeline.push(op) {
                log::error!("dropping {op:?}: {e}");
            }
        }
    }
}

/// Executes a freshly fetched opcode against the CPU state.
///
/// Register-only instructions complete here; anything that needs the bus
/// queues micro-ops that run as the following machine cycles.
pub fn execute(opcode: u8, cpu: &mut CpuState) -> Instruction {
    let prefix = std::mem::take(&mut cpu.prefix);
    let instr = match opcode_table().decode(prefix, opcode) {
        Ok(instr) => instr,
        Err(e) => {
            log::warn!("{e} at {:#06X}, executing as NOP", cpu.regs.fetch_addr);
            Instruction::Nop
        }
    };
    log::debug!(">>> [{:#06X}] {}", cpu.regs.fetch_addr, instr);

    let regs = &mut cpu.regs;
    match instr {
        Instruction::Nop => {}
        Instruction::Halt => regs.halted = true,
        Instruction::Di => {
            regs.iff1 = false;
            regs.iff2 = false;
        }
        Instruction::Ei => {
            regs.iff1 = true;
            regs.iff2 = true;
            cpu.ei_pending = true;
        }
        Instruction::ExAf => regs.swap_af(),
        Instruction::Exx => regs.swap_main(),
        Instruction::LdRR(dst, src) => {
            let value = regs.get8(src);
            regs.set8(dst, value);
        }
        Instruction::IncR(r) | Instruction::DecR(r) | Instruction::XorR(r) => {
            let (mode, right) = match instr {
                Instruction::IncR(_) => (AluMode::Inc, 0),
                Instruction::DecR(_) => (AluMode::Dec, 0),
                _ => (AluMode::Xor, regs.a()),
            };
            let (result, flags) = alu::update(mode, regs.get8(r), right, regs.flags());
            let dst = if mode == AluMode::Xor { Reg8::A } else { r };
            regs.set8(dst, result);
            regs.set_flags(flags);
        }
        Instruction::Im(mode) => regs.im = mode,
        Instruction::LdIA => {
            regs.i = regs.a();
            cpu.queue(&[MicroOp::internal(2)]);
        }
        Instruction::PrefixEd => cpu.prefix = Prefix::Ed,
        Instruction::LdRpImm(rp) => cpu.queue(&[
            MicroOp::read(Addr::Pc, Dst::PairLo(rp)),
            MicroOp::read(Addr::Pc, Dst::PairHi(rp)),
        ]),
        Instruction::LdRImm(r) => cpu.queue(&[MicroOp::read(Addr::Pc, Dst::Reg(r))]),
        Instruction::LdRHl(r) => cpu.queue(&[MicroOp::read(Addr::Hl, Dst::Reg(r))]),
        Instruction::LdHlR(r) => cpu.queue(&[MicroOp::write(Addr::Hl, Src::Reg(r))]),
        Instruction::Jp => cpu.queue(&[
            MicroOp::read(Addr::Pc, Dst::Z),
            MicroOp::read(Addr::Pc, Dst::W).then(Then::JumpWz),
        ]),
        Instruction::Call => cpu.queue(&[
            MicroOp::read(Addr::Pc, Dst::Z),
            MicroOp::read(Addr::Pc, Dst::W),
            MicroOp::internal(2),
            MicroOp::write(Addr::PushSp, Src::PcHi),
            MicroOp::write(Addr::PushSp, Src::PcLo).then(Then::JumpWz),
        ]),
        Instruction::Ret => cpu.queue(&[
            MicroOp::read(Addr::PopSp, Dst::Z),
            MicroOp::read(Addr::PopSp, Dst::W).then(Then::JumpWz),
        ]),
        Instruction::Rst(target) => cpu.queue(&restart(u16::from(target))),
        Instruction::OutImmA => {
            regs.wz = u16::from_be_bytes([regs.a(), regs.wz as u8]);
            cpu.queue(&[
                MicroOp::read(Addr::Pc, Dst::Z),
                MicroOp::new(BusCycle::IoWrite { src: Src::Reg(Reg8::A) }),
            ]);
        }
        Instruction::InAImm => {
            regs.wz = u16::from_be_bytes([regs.a(), regs.wz as u8]);
            cpu.queue(&[
                MicroOp::read(Addr::Pc, Dst::Z),
                MicroOp::new(BusCycle::IoRead { dst: Dst::Reg(Reg8::A) }),
            ]);
        }
    }
    instr
}

/// Push PC and continue at `target`: the tail of RST and of interrupt responses.
pub fn restart(target: u16) -> [MicroOp; 3] {
    [
        MicroOp::internal(2),
        MicroOp::write(Addr::PushSp, Src::PcHi),
        MicroOp::write(Addr::PushSp, Src::PcLo).then(Then::Jump(target)),
    ]
}

/// NMI response: a five T-state dummy opcode fetch, then push PC and jump to 0x0066.
pub fn nmi_response(cpu: &mut CpuState) {
    cpu.regs.iff2 = cpu.regs.iff1;
    cpu.regs.iff1 = false;
    cpu.queue(&[
        MicroOp::internal(10),
        MicroOp::write(Addr::PushSp, Src::PcHi),
        MicroOp::write(Addr::PushSp, Src::PcLo).then(Then::Jump(0x0066)),
    ]);
}

/// Maskable interrupt response: the acknowledge cycle. The rest is queued once
/// the response byte is known, by [`interrupt_vector`].
pub fn int_response(cpu: &mut CpuState) {
    cpu.regs.iff1 = false;
    cpu.regs.iff2 = false;
    cpu.queue(&[MicroOp::new(BusCycle::InterruptAck)]);
}

/// Queues the push-and-jump for the byte read during interrupt acknowledge.
///
/// Returns the IM 2 vector pointer, if the mode uses one.
pub fn interrupt_vector(cpu: &mut CpuState, byte: u8) -> Option<u16> {
    match cpu.regs.im {
        2 => {
            cpu.queue(&[
                MicroOp::write(Addr::PushSp, Src::PcHi),
                MicroOp::write(Addr::PushSp, Src::PcLo),
                MicroOp::read(Addr::Vector(0), Dst::Z),
                MicroOp::read(Addr::Vector(1), Dst::W).then(Then::JumpWz),
            ]);
            Some(u16::from_be_bytes([cpu.regs.i, byte]))
        }
        1 => {
            cpu.queue(&restart(0x0038)[1..]);
            None
        }
        _ => {
            // IM 0 executes the byte on the bus; only RST opcodes are honoured.
            let target = if byte & 0xC7 == 0xC7 {
                u16::from(byte & 0x38)
            } else {
                log::warn!("IM 0 response byte {byte:#04X} is not an RST, using RST 38h");
                0x0038
            };
            cpu.queue(&restart(target)[1..]);
            None
        }
    }
}
