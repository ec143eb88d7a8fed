use super::registers::Flags;

// The ALU's current mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AluMode {
    Inc = 0,
    Dec,
    Xor,
}

fn sign_zero_xy(result: u8) -> Flags {
    let mut flags = Flags::from_bits_retain(result & (Flags::X | Flags::Y).bits());
    flags.set(Flags::SIGN, result & 0x80 != 0);
    flags.set(Flags::ZERO, result == 0);
    flags
}

/// The 8-bit arithmetic and logic unit.
///
/// `carry_in` is the incoming flag register; INC and DEC leave carry untouched.
pub fn update(mode: AluMode, left: u8, right: u8, carry_in: Flags) -> (u8, Flags) {
    match mode {
        AluMode::Inc => {
            let result = left.wrapping_add(1);
            let mut flags = sign_zero_xy(result);
            flags.set(Flags::HALF_CARRY, left & 0x0F == 0x0F);
            flags.set(Flags::PARITY_OVERFLOW, left == 0x7F);
            flags.set(Flags::CARRY, carry_in.contains(Flags::CARRY));
            (result, flags)
        }
        AluMode::Dec => {
            let result = left.wrapping_sub(1);
            let mut flags = sign_zero_xy(result) | Flags::SUBTRACT;
            flags.set(Flags::HALF_CARRY, left & 0x0F == 0x00);
            flags.set(Flags::PARITY_OVERFLOW, left == 0x80);
            flags.set(Flags::CARRY, carry_in.contains(Flags::CARRY));
            (result, flags)
        }
        AluMode::Xor => {
            let result = left ^ right;
            let mut flags = sign_zero_xy(result);
            flags.set(Flags::PARITY_OVERFLOW, result.count_ones() % 2 == 0);
            (result, flags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_a_clears_a() {
        let (result, flags) = update(AluMode::Xor, 0x5A, 0x5A, Flags::all());
        assert_eq!(result, 0);
        assert_eq!(flags, Flags::ZERO | Flags::PARITY_OVERFLOW);
    }

    #[test]
    fn test_inc_overflow_and_half_carry() {
        let (result, flags) = update(AluMode::Inc, 0x7F, 0, Flags::CARRY);
        assert_eq!(result, 0x80);
        assert!(flags.contains(Flags::SIGN | Flags::HALF_CARRY | Flags::PARITY_OVERFLOW | Flags::CARRY));
        assert!(!flags.contains(Flags::SUBTRACT));
    }

    #[test]
    fn test_dec_to_zero() {
        let (result, flags) = update(AluMode::Dec, 0x01, 0, Flags::empty());
        assert_eq!(result, 0);
        assert!(flags.contains(Flags::ZERO | Flags::SUBTRACT));
        assert!(!flags.contains(Flags::CARRY));
        let (_, flags) = update(AluMode::Dec, 0x10, 0, Flags::empty());
        assert!(flags.contains(Flags::HALF_CARRY));
    }
}
