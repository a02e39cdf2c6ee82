//! `stream` subcommand: print device output line by line until Ctrl+C or unplug.
//!
//! A background thread re-enumerates the bus every `rescan_interval_ms` so an
//! unplugged device is torn down and the blocked read ends with `NoDevice`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ardu_usb_lib::Handle;
use ardu_usb_lib::protocol::ENODEV;

use super::{
    Config, DeviceError, LineOutput, Registry, ReadMode, Result, RUNNING, attach, attach_registry,
    select_node, watch_interrupt,
};

/// Consecutive transfer errors tolerated before giving up.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Splits a byte stream into text lines, dropping `\r\n` endings.
///
/// The device is usually mid-line when the stream is opened, so the first
/// line can be dropped.
struct LineSplitter {
    pending: Vec<u8>,
    skip_first: bool,
}

impl LineSplitter {
    fn new(skip_first: bool) -> Self {
        Self {
            pending: Vec::new(),
            skip_first,
        }
    }

    fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if b != b'\n' {
                self.pending.push(b);
                continue;
            }
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.skip_first {
                self.skip_first = false;
                continue;
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Unterminated trailing text, if any.
    fn finish(self) -> Option<String> {
        if self.skip_first || self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

fn print_line(node: &str, line: &str, json: bool) -> Result<()> {
    if json {
        let out = LineOutput { node, line };
        println!(
            "{}",
            serde_json::to_string(&out).map_err(std::io::Error::other)?
        );
    } else {
        println!("{line}");
    }
    Ok(())
}

/// Re-enumerate periodically until `done` or Ctrl+C.
fn rescan_loop(registry: &Registry, config: &Config, done: &AtomicBool) {
    let interval = Duration::from_millis(config.rescan_interval_ms);
    let tick = interval.min(Duration::from_millis(50));
    let running = || RUNNING.load(Ordering::SeqCst) && !done.load(Ordering::SeqCst);

    while running() {
        let deadline = Instant::now() + interval;
        while running() && Instant::now() < deadline {
            thread::sleep(tick);
        }
        if !running() {
            break;
        }
        let report = attach::rescan(registry, config);
        for node in &report.detached {
            log::info!("{}: unplugged", registry.name(*node));
        }
        for node in &report.attached {
            log::info!("{}: plugged in", registry.name(*node));
        }
    }
}

fn read_lines(handle: &Handle, name: &str, keep_first: bool, json: bool) -> Result<()> {
    let mut splitter = LineSplitter::new(!keep_first);
    let mut buf = vec![0u8; handle.info().capacity];
    let mut errors = 0;

    loop {
        match handle.read(&mut buf, ReadMode::Blocking) {
            Ok(n) => {
                errors = 0;
                for line in splitter.push(&buf[..n]) {
                    print_line(name, &line, json)?;
                }
            }
            Err(DeviceError::Interrupted) => break,
            Err(DeviceError::NoDevice | DeviceError::Io { code: ENODEV, .. }) => {
                log::warn!("{name}: device disconnected");
                break;
            }
            Err(DeviceError::Io { code, detail }) if errors + 1 < MAX_CONSECUTIVE_ERRORS => {
                errors += 1;
                log::warn!("{name}: transfer error {code} ({detail}), retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(rest) = splitter.finish() {
        print_line(name, &rest, json)?;
    }
    Ok(())
}

pub(super) fn cmd_stream(
    config: &Config,
    node: Option<&str>,
    keep_first: bool,
    json: bool,
) -> Result<()> {
    let registry = attach_registry(config)?;
    let node = select_node(&registry, node)?;
    let name = registry.name(node);
    let handle = ardu_usb_lib::open(&registry, node)?;

    let interrupter = handle.interrupter();
    watch_interrupt(Some(interrupter.clone()));
    if !RUNNING.load(Ordering::SeqCst) {
        interrupter.interrupt();
    }
    if !json {
        eprintln!(
            "[stream] {name}: {} ({} byte chunks), Ctrl+C to stop",
            handle.info().path,
            handle.info().capacity
        );
    }

    let done = AtomicBool::new(false);
    let result = thread::scope(|s| {
        s.spawn(|| rescan_loop(&registry, config, &done));
        let result = read_lines(&handle, &name, keep_first, json);
        done.store(true, Ordering::SeqCst);
        result
    });

    watch_interrupt(None);
    handle.close();
    result
}
