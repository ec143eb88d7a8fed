#![doc = include_str!("../README.md")]

pub mod emu;
pub mod machine;
pub mod plat;
pub mod shell;
