//! `read` subcommand: attach, open one node and perform a single read.

use std::io::Write;
use std::sync::atomic::Ordering;

use super::{
    Config, ReadMode, ReadOutput, Result, RUNNING, attach_registry, hex_bytes, select_node,
    watch_interrupt,
};

pub(super) fn cmd_read(
    config: &Config,
    node: Option<&str>,
    bytes: usize,
    mode: ReadMode,
    hex: bool,
    json: bool,
) -> Result<()> {
    let registry = attach_registry(config)?;
    let node = select_node(&registry, node)?;
    let name = registry.name(node);
    let handle = ardu_usb_lib::open(&registry, node)?;
    log::info!("{name}: opened {}", handle.info().path);

    let interrupter = handle.interrupter();
    watch_interrupt(Some(interrupter.clone()));
    if !RUNNING.load(Ordering::SeqCst) {
        interrupter.interrupt();
    }

    let mut buf = vec![0u8; bytes];
    let result = handle.read(&mut buf, mode);
    watch_interrupt(None);
    let n = result?;
    let data = &buf[..n];

    if json {
        let output = ReadOutput {
            node: name,
            device: handle.info().clone(),
            requested: bytes,
            count: n,
            hex: hex_bytes(data),
            text: String::from_utf8_lossy(data).into_owned(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(std::io::Error::other)?
        );
    } else if hex {
        println!("{}", hex_bytes(data));
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()?;
    }

    handle.close();
    Ok(())
}
