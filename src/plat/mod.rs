//! Z80 instruction-set definitions shared by the CPU core and the debug shell.

use std::fmt;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use thiserror::Error;

/// An error for the instruction-set layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid register index {0}")]
    InvalidRegister(u8),
    #[error("invalid register pair index {0}")]
    InvalidRegisterPair(u8),
    #[error("unimplemented opcode {prefix}{opcode:02X}")]
    InvalidOpcode { prefix: Prefix, opcode: u8 },
}

/// Type alias for Result<T, [PlatformError]>.
pub type PResult<T> = Result<T, PlatformError>;

/// The 8-bit registers addressable from the `r` field of an opcode.
///
/// Index 6 encodes `(HL)`, which is a memory operand, not a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg8 {
    B = 0,
    C,
    D,
    E,
    H,
    L,
    A = 7,
}

impl TryFrom<u8> for Reg8 {
    type Error = PlatformError;

    fn try_from(value: u8) -> PResult<Self> {
        match value {
            0 => Ok(Self::B),
            1 => Ok(Self::C),
            2 => Ok(Self::D),
            3 => Ok(Self::E),
            4 => Ok(Self::H),
            5 => Ok(Self::L),
            7 => Ok(Self::A),
            _ => Err(PlatformError::InvalidRegister(value)),
        }
    }
}

impl fmt::Display for Reg8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::H => "H",
            Self::L => "L",
            Self::A => "A",
        };
        f.write_str(s)
    }
}

/// The register pairs addressable from the `rp` field of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegPair {
    BC = 0,
    DE,
    HL,
    SP,
}

impl TryFrom<u8> for RegPair {
    type Error = PlatformError;

    fn try_from(value: u8) -> PResult<Self> {
        match value {
            0 => Ok(Self::BC),
            1 => Ok(Self::DE),
            2 => Ok(Self::HL),
            3 => Ok(Self::SP),
            _ => Err(PlatformError::InvalidRegisterPair(value)),
        }
    }
}

impl fmt::Display for RegPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BC => "BC",
            Self::DE => "DE",
            Self::HL => "HL",
            Self::SP => "SP",
        };
        f.write_str(s)
    }
}

/// Opcode page selected by a prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Prefix {
    #[default]
    None,
    Ed,
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Ed => f.write_str("ED "),
        }
    }
}

/// The decoded instructions the core knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Nop,
    Halt,
    Di,
    Ei,
    /// `EX AF,AF'`
    ExAf,
    Exx,
    /// `LD rp,nn`
    LdRpImm(RegPair),
    /// `LD r,n`
    LdRImm(Reg8),
    /// `LD r,r'`
    LdRR(Reg8, Reg8),
    /// `LD r,(HL)`
    LdRHl(Reg8),
    /// `LD (HL),r`
    LdHlR(Reg8),
    IncR(Reg8),
    DecR(Reg8),
    XorR(Reg8),
    /// `JP nn`
    Jp,
    /// `CALL nn`
    Call,
    Ret,
    /// `RST p`, with the restart address.
    Rst(u8),
    /// `OUT (n),A`
    OutImmA,
    /// `IN A,(n)`
    InAImm,
    /// The `ED` prefix byte itself.
    PrefixEd,
    /// `IM 0/1/2`
    Im(u8),
    /// `LD I,A`
    LdIA,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "NOP"),
            Self::Halt => write!(f, "HALT"),
            Self::Di => write!(f, "DI"),
            Self::Ei => write!(f, "EI"),
            Self::ExAf => write!(f, "EX AF,AF'"),
            Self::Exx => write!(f, "EXX"),
            Self::LdRpImm(rp) => write!(f, "LD {rp},nn"),
            Self::LdRImm(r) => write!(f, "LD {r},n"),
            Self::LdRR(dst, src) => write!(f, "LD {dst},{src}"),
            Self::LdRHl(r) => write!(f, "LD {r},(HL)"),
            Self::LdHlR(r) => write!(f, "LD (HL),{r}"),
            Self::IncR(r) => write!(f, "INC {r}"),
            Self::DecR(r) => write!(f, "DEC {r}"),
            Self::XorR(r) => write!(f, "XOR {r}"),
            Self::Jp => write!(f, "JP nn"),
            Self::Call => write!(f, "CALL nn"),
            Self::Ret => write!(f, "RET"),
            Self::Rst(p) => write!(f, "RST {p:02X}h"),
            Self::OutImmA => write!(f, "OUT (n),A"),
            Self::InAImm => write!(f, "IN A,(n)"),
            Self::PrefixEd => write!(f, "<ED>"),
            Self::Im(mode) => write!(f, "IM {mode}"),
            Self::LdIA => write!(f, "LD I,A"),
        }
    }
}

/// Opcode-to-instruction maps for the unprefixed and `ED` pages.
///
/// Only implemented opcodes have entries; anything else decodes to `None`.
#[derive(Debug, Default)]
pub struct OpcodeTable {
    base: FxHashMap<u8, Instruction>,
    ed: FxHashMap<u8, Instruction>,
}

impl OpcodeTable {
    pub fn build() -> Self {
        let mut base = FxHashMap::default();
        base.insert(0x00, Instruction::Nop);
        base.insert(0x08, Instruction::ExAf);
        base.insert(0x76, Instruction::Halt);
        base.insert(0xC3, Instruction::Jp);
        base.insert(0xC9, Instruction::Ret);
        base.insert(0xCD, Instruction::Call);
        base.insert(0xD3, Instruction::OutImmA);
        base.insert(0xD9, Instruction::Exx);
        base.insert(0xDB, Instruction::InAImm);
        base.insert(0xED, Instruction::PrefixEd);
        base.insert(0xF3, Instruction::Di);
        base.insert(0xFB, Instruction::Ei);

        for p in 0..4u8 {
            if let Ok(rp) = RegPair::try_from(p) {
                base.insert(0x01 | p << 4, Instruction::LdRpImm(rp));
            }
        }
        for y in 0..8u8 {
            base.insert(0xC7 | y << 3, Instruction::Rst(y << 3));
            let Ok(r) = Reg8::try_from(y) else {
                continue;
            };
            base.insert(0x06 | y << 3, Instruction::LdRImm(r));
            base.insert(0x04 | y << 3, Instruction::IncR(r));
            base.insert(0x05 | y << 3, Instruction::DecR(r));
            base.insert(0xA8 | y, Instruction::XorR(r));
            base.insert(0x46 | y << 3, Instruction::LdRHl(r));
            base.insert(0x70 | y, Instruction::LdHlR(r));
            for z in 0..8u8 {
                if let Ok(src) = Reg8::try_from(z) {
                    base.insert(0x40 | y << 3 | z, Instruction::LdRR(r, src));
                }
            }
        }

        let mut ed = FxHashMap::default();
        ed.insert(0x46, Instruction::Im(0));
        ed.insert(0x56, Instruction::Im(1));
        ed.insert(0x5E, Instruction::Im(2));
        ed.insert(0x47, Instruction::LdIA);

        Self { base, ed }
    }

    pub fn decode(&self, prefix: Prefix, opcode: u8) -> PResult<Instruction> {
        let page = match prefix {
            Prefix::None => &self.base,
            Prefix::Ed => &self.ed,
        };
        page.get(&opcode)
            .copied()
            .ok_or(PlatformError::InvalidOpcode { prefix, opcode })
    }

    pub fn len(&self) -> usize {
        self.base.len() + self.ed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The table, built on first use.
pub fn opcode_table() -> &'static OpcodeTable {
    static TABLE: OnceLock<OpcodeTable> = OnceLock::new();
    TABLE.get_or_init(OpcodeTable::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_decode() {
        assert_eq!(Reg8::try_from(7), Ok(Reg8::A));
        assert_eq!(Reg8::try_from(6), Err(PlatformError::InvalidRegister(6)));
        assert_eq!(RegPair::try_from(3), Ok(RegPair::SP));
        assert!(RegPair::try_from(4).is_err());
    }

    #[test]
    fn test_instruction_decode() {
        let table = opcode_table();
        assert_eq!(table.decode(Prefix::None, 0x00), Ok(Instruction::Nop));
        assert_eq!(table.decode(Prefix::None, 0x21), Ok(Instruction::LdRpImm(RegPair::HL)));
        assert_eq!(table.decode(Prefix::None, 0x3E), Ok(Instruction::LdRImm(Reg8::A)));
        assert_eq!(table.decode(Prefix::None, 0x78), Ok(Instruction::LdRR(Reg8::A, Reg8::B)));
        assert_eq!(table.decode(Prefix::None, 0x7E), Ok(Instruction::LdRHl(Reg8::A)));
        assert_eq!(table.decode(Prefix::None, 0x77), Ok(Instruction::LdHlR(Reg8::A)));
        assert_eq!(table.decode(Prefix::None, 0x76), Ok(Instruction::Halt));
        assert_eq!(table.decode(Prefix::None, 0xAF), Ok(Instruction::XorR(Reg8::A)));
        assert_eq!(table.decode(Prefix::None, 0xFF), Ok(Instruction::Rst(0x38)));
        assert_eq!(table.decode(Prefix::Ed, 0x56), Ok(Instruction::Im(1)));
    }

    #[test]
    fn test_unimplemented_opcodes_have_no_entry() {
        let table = opcode_table();
        assert_eq!(
            table.decode(Prefix::None, 0x18),
            Err(PlatformError::InvalidOpcode {
                prefix: Prefix::None,
                opcode: 0x18
            })
        );
        assert!(table.decode(Prefix::Ed, 0x00).is_err());
        assert!(table.decode(Prefix::None, 0x34).is_err());
    }

    #[test]
    fn test_instruction_display() {
        assert_eq!(Instruction::LdRR(Reg8::A, Reg8::H).to_string(), "LD A,H");
        assert_eq!(Instruction::Rst(0x38).to_string(), "RST 38h");
    }
}
