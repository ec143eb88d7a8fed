use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use zxsim::emu::board::{BoardConfig, Motherboard};
use zxsim::machine;
use zxsim::shell::Shell;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// 16K ROM image mapped at 0x0000. Without one the ROM reads as zeroes.
    #[arg(long)]
    rom: Option<PathBuf>,

    /// Master clock in Hz.
    #[arg(long, default_value_t = machine::CRYSTAL_HZ)]
    frequency: u64,

    /// Keep this many bus transitions for the `trace` command.
    #[arg(long)]
    trace: Option<usize>,

    /// Overrides the default log level.
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Start free-running instead of stopped.
    #[arg(long)]
    run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    TermLogger::init(
        args.log_level.unwrap_or(
            #[cfg(debug_assertions)]
            LevelFilter::Trace,
            #[cfg(not(debug_assertions))]
            LevelFilter::Info,
        ),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let mut config = BoardConfig::default().with_frequency(args.frequency);
    if let Some(depth) = args.trace {
        config = config.with_trace(depth);
    }

    let mut mb = Motherboard::new();
    let id = mb.add_board(machine::BOARD, &config)?;
    let devices = machine::spectrum_48k(args.rom.as_deref())?;
    mb.add_devices(id, devices, Some(args.frequency))?;
    // Reset leaves the board running; otherwise it waits for `step` or `run`.
    if args.run {
        mb.reset(id)?;
    }

    Shell::new(&mb, id).repl()?;
    mb.shutdown();
    Ok(())
}
