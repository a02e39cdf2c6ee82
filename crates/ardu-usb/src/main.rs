//! ardu-usb: read the bulk-in stream of Arduino-class USB devices.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use ardu_usb_lib::Interrupter;
use clap::{ArgAction, Parser};

mod cli;

/// Shared shutdown flag, cleared by the Ctrl+C handler.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

/// Interrupter of the handle currently reading, if any.
static ACTIVE_READ: Mutex<Option<Interrupter>> = Mutex::new(None);

/// Register (or clear) the read that Ctrl+C should interrupt.
pub fn watch_interrupt(interrupter: Option<Interrupter>) {
    *ACTIVE_READ
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = interrupter;
}

#[derive(Parser)]
#[command(
    name = "ardu-usb",
    version,
    about = "Read the bulk-in stream of Arduino-class USB devices"
)]
struct Args {
    /// Output as JSON (for devices, probe, read, stream, config)
    #[arg(long, global = true)]
    json: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: cli::Command,
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(args.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    ctrlc::set_handler(move || {
        RUNNING.store(false, Ordering::SeqCst);
        if let Some(interrupter) = ACTIVE_READ
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            interrupter.interrupt();
        }
    })
    .ok();

    if let Err(e) = cli::run(args.command, args.json, args.config.as_deref()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
