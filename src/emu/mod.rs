//! The cycle-level emulation engine: signal bus, clocks, devices and boards.

use thiserror::Error;

use self::board::BoardId;
use self::name::Name;

pub mod alu;
pub mod board;
pub mod clock;
pub mod cpu;
pub mod device;
pub mod io;
pub mod memory;
pub mod microcode;
pub mod name;
pub mod queue;
pub mod registers;
pub mod signal;
pub mod timer;
pub mod vcu;
pub mod worker;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("board {board} already has a device named {device}")]
    DuplicateDevice { board: Name, device: Name },
    #[error("no board {0}")]
    UnknownBoard(BoardId),
    #[error("board {board} has no device named {device}")]
    UnknownDevice { board: Name, device: Name },
    #[error("failed to start worker thread: {0}")]
    ThreadStart(std::io::Error),
    #[error("worker thread for board {0} is gone")]
    Disconnected(Name),
    #[error("expected {expected} state, got {actual}")]
    StateMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("micro-op pipeline is full")]
    PipelineFull,
}
