use crate::plat::{Reg8, RegPair};

bitflags::bitflags! {
    /// The Z80 flag register (F).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Carry out of bit 7.
        const CARRY = 1 << 0;
        /// Set when the last operation was a subtraction.
        const SUBTRACT = 1 << 1;
        /// Parity (logic ops) or signed overflow (arithmetic).
        const PARITY_OVERFLOW = 1 << 2;
        /// Undocumented copy of result bit 3.
        const X = 1 << 3;
        /// Carry out of bit 3.
        const HALF_CARRY = 1 << 4;
        /// Undocumented copy of result bit 5.
        const Y = 1 << 5;
        const ZERO = 1 << 6;
        const SIGN = 1 << 7;
    }
}

/// Which bus transaction the CPU is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MachineCycle {
    #[default]
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
}

impl MachineCycle {
    /// The following cycle. Anything past M6 stays at M6.
    pub fn next(self) -> Self {
        match self {
            Self::M1 => Self::M2,
            Self::M2 => Self::M3,
            Self::M3 => Self::M4,
            Self::M4 => Self::M5,
            Self::M5 | Self::M6 => Self::M6,
        }
    }
}

/// Half-clock phase within a machine cycle: T-state number, then first or second half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Step {
    #[default]
    T1H1,
    T1H2,
    T2H1,
    T2H2,
    T3H1,
    T3H2,
    T4H1,
    T4H2,
    T5H1,
    T5H2,
    T6H1,
    T6H2,
    /// The machine cycle has finished.
    Done,
}

impl Step {
    pub fn next(self) -> Self {
        match self {
            Self::T1H1 => Self::T1H2,
            Self::T1H2 => Self::T2H1,
            Self::T2H1 => Self::T2H2,
            Self::T2H2 => Self::T3H1,
            Self::T3H1 => Self::T3H2,
            Self::T3H2 => Self::T4H1,
            Self::T4H1 => Self::T4H2,
            Self::T4H2 => Self::T5H1,
            Self::T5H1 => Self::T5H2,
            Self::T5H2 => Self::T6H1,
            Self::T6H1 => Self::T6H2,
            Self::T6H2 | Self::Done => Self::Done,
        }
    }

    /// Zero-based half-clock index.
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// The Z80 register file plus the decode cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    pub pc: u16,
    pub sp: u16,
    pub ix: u16,
    pub iy: u16,
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub i: u8,
    /// Memory refresh counter. Only the low seven bits count.
    pub r: u8,
    /// Hidden temporary (WZ / MEMPTR).
    pub wz: u16,
    /// Address driven during the most recent opcode fetch.
    pub fetch_addr: u16,
    pub m_cycle: MachineCycle,
    pub step: Step,
    /// The last fetched opcode.
    pub opcode: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
}

impl RegisterFile {
    pub fn a(&self) -> u8 {
        (self.af >> 8) as u8
    }

    pub fn set_a(&mut self, value: u8) {
        self.af = (self.af & 0x00FF) | (u16::from(value) << 8);
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_retain(self.af as u8)
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.af = (self.af & 0xFF00) | u16::from(flags.bits());
    }

    pub fn get8(&self, reg: Reg8) -> u8 {
        match reg {
            Reg8::B => (self.bc >> 8) as u8,
            Reg8::C => self.bc as u8,
            Reg8::D => (self.de >> 8) as u8,
            Reg8::E => self.de as u8,
            Reg8::H => (self.hl >> 8) as u8,
            Reg8::L => self.hl as u8,
            Reg8::A => self.a(),
        }
    }

    pub fn set8(&mut self, reg: Reg8, value: u8) {
        fn hi(pair: &mut u16, v: u8) {
            *pair = (*pair & 0x00FF) | (u16::from(v) << 8);
        }
        fn lo(pair: &mut u16, v: u8) {
            *pair = (*pair & 0xFF00) | u16::from(v);
        }
        match reg {
            Reg8::B => hi(&mut self.bc, value),
            Reg8::C => lo(&mut self.bc, value),
            Reg8::D => hi(&mut self.de, value),
            Reg8::E => lo(&mut self.de, value),
            Reg8::H => hi(&mut self.hl, value),
            Reg8::L => lo(&mut self.hl, value),
            Reg8::A => self.set_a(value),
        }
    }

    pub fn pair_mut(&mut self, rp: RegPair) -> &mut u16 {
        match rp {
            RegPair::BC => &mut self.bc,
            RegPair::DE => &mut self.de,
            RegPair::HL => &mut self.hl,
            RegPair::SP => &mut self.sp,
        }
    }

    pub fn get16(&self, rp: RegPair) -> u16 {
        match rp {
            RegPair::BC => self.bc,
            RegPair::DE => self.de,
            RegPair::HL => self.hl,
            RegPair::SP => self.sp,
        }
    }

    /// `EX AF,AF'`
    pub fn swap_af(&mut self) {
        std::mem::swap(&mut self.af, &mut self.af_alt);
    }

    /// `EXX`
    pub fn swap_main(&mut self) {
        std::mem::swap(&mut self.bc, &mut self.bc_alt);
        std::mem::swap(&mut self.de, &mut self.de_alt);
        std::mem::swap(&mut self.hl, &mut self.hl_alt);
    }

    /// Bumps the seven-bit refresh counter, leaving bit 7 alone.
    pub fn increment_r(&mut self) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7F);
    }

    pub fn refresh_address(&self) -> u16 {
        u16::from_be_bytes([self.i, self.r])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eight_bit_access() {
        let mut regs = RegisterFile::default();
        regs.set8(Reg8::B, 0x12);
        regs.set8(Reg8::C, 0x34);
        regs.set8(Reg8::A, 0xAB);
        assert_eq!(regs.bc, 0x1234);
        assert_eq!(regs.get8(Reg8::C), 0x34);
        assert_eq!(regs.af, 0xAB00);
        *regs.pair_mut(RegPair::HL) = 0xBEEF;
        assert_eq!(regs.get8(Reg8::H), 0xBE);
        assert_eq!(regs.get8(Reg8::L), 0xEF);
    }

    #[test]
    fn test_refresh_counter_keeps_bit7() {
        let mut regs = RegisterFile {
            r: 0xFF,
            ..RegisterFile::default()
        };
        regs.increment_r();
        assert_eq!(regs.r, 0x80);
        regs.r = 0x7F;
        regs.increment_r();
        assert_eq!(regs.r, 0x00);
    }

    #[test]
    fn test_step_sequence() {
        let mut step = Step::T1H1;
        let mut count = 0;
        while step != Step::Done {
            step = step.next();
            count += 1;
        }
        assert_eq!(count, 12);
        assert_eq!(MachineCycle::M1.next(), MachineCycle::M2);
        assert_eq!(MachineCycle::M6.next(), MachineCycle::M6);
    }

    #[test]
    fn test_shadow_swaps() {
        let mut regs = RegisterFile {
            af: 1,
            bc: 2,
            af_alt: 10,
            bc_alt: 20,
            ..RegisterFile::default()
        };
        regs.swap_af();
        regs.swap_main();
        assert_eq!((regs.af, regs.bc), (10, 20));
        assert_eq!((regs.af_alt, regs.bc_alt), (1, 2));
    }
}
