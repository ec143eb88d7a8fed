use anyhow::{anyhow, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{digit1, hex_digit1},
    combinator::{all_consuming, map_res},
    sequence::{preceded, terminated},
    IResult,
};

/// `0x1F`, `$1F`, `1Fh` or `31`.
pub fn lex_number(inp: &str) -> IResult<&str, u32> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |x: &str| {
            u32::from_str_radix(x, 16)
        }),
        map_res(preceded(tag("$"), hex_digit1), |x: &str| u32::from_str_radix(x, 16)),
        map_res(terminated(hex_digit1, tag_no_case("h")), |x: &str| {
            u32::from_str_radix(x, 16)
        }),
        map_res(digit1, |x: &str| x.parse::<u32>()),
    ))(inp)
}

pub fn parse_number(s: &str) -> Result<u32> {
    all_consuming(lex_number)(s.trim())
        .map(|(_, n)| n)
        .map_err(|_| anyhow!("not a number: {s:?}"))
}

pub fn parse_u16(s: &str) -> Result<u16> {
    let n = parse_number(s)?;
    u16::try_from(n).map_err(|_| anyhow!("{s} does not fit in 16 bits"))
}

pub fn parse_u8(s: &str) -> Result<u8> {
    let n = parse_number(s)?;
    u8::try_from(n).map_err(|_| anyhow!("{s} does not fit in 8 bits"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_forms() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x4000").unwrap(), 0x4000);
        assert_eq!(parse_number("0XfF").unwrap(), 0xFF);
        assert_eq!(parse_number("$5C00").unwrap(), 0x5C00);
        assert_eq!(parse_number("38h").unwrap(), 0x38);
        assert_eq!(parse_number("FFH").unwrap(), 0xFF);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_number("").is_err());
        assert!(parse_number("12x").is_err());
        assert!(parse_number("FF").is_err());
        assert!(parse_number("0x").is_err());
    }

    #[test]
    fn test_width_checks() {
        assert_eq!(parse_u16("0xFFFF").unwrap(), 0xFFFF);
        assert!(parse_u16("0x10000").is_err());
        assert_eq!(parse_u8("255").unwrap(), 255);
        assert!(parse_u8("256").is_err());
    }
}
