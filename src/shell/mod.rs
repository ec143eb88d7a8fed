//! Interactive debug shell over one board.

use std::fmt::Write as _;

use anyhow::{anyhow, Result};
use easy_repl::{command, repl::LoopStatus, CommandStatus, Repl};

use crate::emu::board::{BoardId, Motherboard};
use crate::emu::memory::{Memory, MemorySnapshot};
use crate::emu::registers::{Flags, RegisterFile};
use crate::emu::signal::TraceEntry;
use crate::emu::vcu::VideoFrame;
use crate::emu::worker::BoardStatus;
use crate::machine;

pub mod parse;

use self::parse::{parse_number, parse_u16, parse_u8};

pub fn format_registers(regs: &RegisterFile) -> String {
    let flags = regs.flags();
    let flag_chars: String = [
        (Flags::SIGN, 'S'),
        (Flags::ZERO, 'Z'),
        (Flags::Y, '5'),
        (Flags::HALF_CARRY, 'H'),
        (Flags::X, '3'),
        (Flags::PARITY_OVERFLOW, 'P'),
        (Flags::SUBTRACT, 'N'),
        (Flags::CARRY, 'C'),
    ]
    .iter()
    .map(|&(flag, c)| if flags.contains(flag) { c } else { '-' })
    .collect();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "PC={:04X} SP={:04X} IX={:04X} IY={:04X} WZ={:04X}",
        regs.pc, regs.sp, regs.ix, regs.iy, regs.wz
    );
    let _ = writeln!(
        out,
        "AF={:04X} BC={:04X} DE={:04X} HL={:04X}  [{}]",
        regs.af, regs.bc, regs.de, regs.hl, flag_chars
    );
    let _ = writeln!(
        out,
        "AF'={:04X} BC'={:04X} DE'={:04X} HL'={:04X}",
        regs.af_alt, regs.bc_alt, regs.de_alt, regs.hl_alt
    );
    let _ = write!(
        out,
        "I={:02X} R={:02X} IM {} IFF1={} IFF2={} {:?}/{:?} op={:02X}{}",
        regs.i,
        regs.r,
        regs.im,
        u8::from(regs.iff1),
        u8::from(regs.iff2),
        regs.m_cycle,
        regs.step,
        regs.opcode,
        if regs.halted { " HALT" } else { "" }
    );
    out
}

/// Sixteen bytes per line, starting at `addr`.
pub fn hex_dump(snapshot: &MemorySnapshot, addr: u16, len: usize) -> Vec<String> {
    let flat = snapshot.flatten();
    let start = usize::from(addr);
    let end = (start + len).min(flat.len());
    flat[start..end]
        .chunks(16)
        .enumerate()
        .map(|(i, row)| {
            let bytes: Vec<_> = row.iter().map(|b| format!("{b:02X}")).collect();
            format!("{:04X}: {}", start + i * 16, bytes.join(" "))
        })
        .collect()
}

pub fn format_trace(entries: &[TraceEntry], last: usize) -> Vec<String> {
    let skip = entries.len().saturating_sub(last);
    entries[skip..]
        .iter()
        .map(|e| format!("{:>10} {:<5} {:?}", e.tick, e.signal, e.state))
        .collect()
}

pub fn format_status(status: &BoardStatus) -> String {
    let mut out = format!(
        "{:?} at {} Hz, tick {} ({} elapsed), {} events, {} timers",
        status.state,
        status.frequency,
        status.counter,
        status.elapsed,
        status.pending_events,
        status.pending_timers
    );
    for device in &status.devices {
        let _ = write!(
            out,
            "\n  {:<8} {:?} /{}",
            device.name,
            device.kind,
            1u64 << device.divider
        );
    }
    out
}

pub fn format_beam(frame: &VideoFrame) -> String {
    format!(
        "beam x={} y={} frame={} border={}",
        frame.beam_x, frame.beam_y, frame.frame, frame.border
    )
}

/// Debug shell bound to one board of the 48K layout.
pub struct Shell<'a> {
    mb: &'a Motherboard,
    board: BoardId,
}

impl<'a> Shell<'a> {
    pub fn new(mb: &'a Motherboard, board: BoardId) -> Self {
        Self { mb, board }
    }

    fn regs(&self) -> RegisterFile {
        self.mb.get_state(self.board, machine::CPU)
    }

    fn poke(&self, addr: u16, value: u8) -> Result<()> {
        let snapshot = self.mb.memory_snapshot(self.board)?;
        // Same device the last-write-wins flattening would show.
        let device = snapshot
            .blocks
            .iter()
            .rev()
            .find(|b| addr >= b.base && usize::from(addr - b.base) < b.bytes.len())
            .map(|b| b.device)
            .ok_or_else(|| anyhow!("nothing mapped at {addr:04X}"))?;
        self.mb
            .with_device(self.board, device, move |mem: &mut Memory| mem.poke(addr, value))?;
        Ok(())
    }

    pub fn repl(&self) -> Result<()> {
        let mut repl = Repl::builder()
            .description("zxsim debug shell")
            .add(
                "reset",
                command! {
                    "Pulse RESET",
                    () => || {
                        self.mb.reset(self.board)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "nmi",
                command! {
                    "Pulse NMI",
                    () => || {
                        self.mb.non_maskable_interrupt(self.board)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "run",
                command! {
                    "Free-run the board",
                    () => || {
                        self.mb.run(self.board)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "stop",
                command! {
                    "Pause the board",
                    () => || {
                        self.mb.stop(self.board)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "step",
                command! {
                    "Run this many master clock ticks",
                    (ticks:String) => |ticks: String| {
                        let ticks = parse_number(&ticks)?;
                        self.mb.step(self.board, u64::from(ticks))?;
                        eprintln!("{}", format_registers(&self.regs()));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "regs",
                command! {
                    "Print the CPU registers",
                    () => || {
                        eprintln!("{}", format_registers(&self.regs()));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "peek",
                command! {
                    "Peek a byte from memory",
                    (addr:String) => |addr: String| {
                        let addr = parse_u16(&addr)?;
                        let snapshot = self.mb.memory_snapshot(self.board)?;
                        match snapshot.read(addr) {
                            Some(val) => eprintln!("{addr:04X}={val:02X}"),
                            None => eprintln!("{addr:04X} is unmapped"),
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "dump",
                command! {
                    "Hex dump LEN bytes from ADDR",
                    (addr:String, len:String) => |addr: String, len: String| {
                        let addr = parse_u16(&addr)?;
                        let len = parse_number(&len)? as usize;
                        let snapshot = self.mb.memory_snapshot(self.board)?;
                        for line in hex_dump(&snapshot, addr, len) {
                            eprintln!("{line}");
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "poke",
                command! {
                    "Write a byte to memory",
                    (addr:String, val:String) => |addr: String, val: String| {
                        self.poke(parse_u16(&addr)?, parse_u8(&val)?)?;
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "beam",
                command! {
                    "Print the video beam position",
                    () => || {
                        let frame: VideoFrame = self.mb.get_state(self.board, machine::VCU);
                        eprintln!("{}", format_beam(&frame));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "status",
                command! {
                    "Print the board status",
                    () => || {
                        eprintln!("{}", format_status(&self.mb.status(self.board)?));
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "trace",
                command! {
                    "Print the last N recorded bus transitions",
                    (n:String) => |n: String| {
                        let n = parse_number(&n)? as usize;
                        let trace = self.mb.trace(self.board)?;
                        if trace.entries.is_empty() {
                            eprintln!("no trace recorded (start with --trace <depth>)");
                        }
                        for line in format_trace(&trace.entries, n) {
                            eprintln!("{line}");
                        }
                        Ok(CommandStatus::Done)
                    }
                },
            )
            .add(
                "quit",
                command! {
                    "Leave the shell",
                    () => || {
                        Ok(CommandStatus::Quit)
                    }
                },
            )
            .build()?;
        eprintln!("zxsim debug shell");
        'repl: loop {
            eprintln!();
            {
                let regs = self.regs();
                eprintln!("[pc={:04X}] {:?}/{:?}", regs.pc, regs.m_cycle, regs.step);
            }

            let status = repl.next()?;
            if let LoopStatus::Break = status {
                break 'repl;
            }
        }
        Ok(())
    }
}
