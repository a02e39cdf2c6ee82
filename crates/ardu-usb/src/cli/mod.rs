//! CLI subcommands: discovery, probing, reading and streaming.

mod config_cmd;
mod devices;
mod probe;
mod read;
mod stream;

use std::path::Path;

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::{RUNNING, watch_interrupt};
pub(super) use ardu_usb_lib::attach::{self, DiscoveredDevice};
pub(super) use ardu_usb_lib::config::Config;
pub(super) use ardu_usb_lib::device::{DeviceError, DeviceInfo, ReadMode};
pub(super) use ardu_usb_lib::error::{ArduError, Result};
pub(super) use ardu_usb_lib::{NodeId, Registry};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{key:<width$}{value}", width = w);
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Space-separated lowercase hex, e.g. `0d 0a`.
pub(super) fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct DevicesOutput {
    pub count: usize,
    pub devices: Vec<DiscoveredDevice>,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub problems: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct ReadOutput {
    pub node: String,
    pub device: DeviceInfo,
    pub requested: usize,
    pub count: usize,
    pub hex: String,
    pub text: String,
}

#[derive(Serialize)]
pub(super) struct LineOutput<'a> {
    pub node: &'a str,
    pub line: &'a str,
}

#[derive(Subcommand)]
pub enum Command {
    /// List attached devices matching the configured vendor/product id
    Devices,

    /// Print interface and endpoint descriptors of matching devices
    Probe,

    /// Attach, open a node and perform one read
    Read {
        /// Node to read from (e.g. ardu0); default: first attached
        #[arg(long)]
        node: Option<String>,
        /// Maximum number of bytes to read
        #[arg(long, default_value_t = 64)]
        bytes: usize,
        /// Fail with "would block" instead of waiting for data
        #[arg(long)]
        nonblock: bool,
        /// Print bytes as hex instead of raw
        #[arg(long)]
        hex: bool,
    },

    /// Print device output line by line until Ctrl+C or unplug
    Stream {
        /// Node to read from (e.g. ardu0); default: first attached
        #[arg(long)]
        node: Option<String>,
        /// Also print the first (usually partial) line
        #[arg(long)]
        keep_first: bool,
    },

    /// Show current configuration and file path
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Load the config from `custom_path` or the default location, logging
/// parse warnings.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    let Some(path) = custom_path else {
        return Config::load();
    };
    let (config, warnings) = Config::load_from(path);
    for w in &warnings {
        log::warn!("{w}");
    }
    config
}

/// Attach every matching device into a fresh registry.
pub(super) fn attach_registry(config: &Config) -> Result<Registry> {
    let registry = Registry::from_config(config);
    let attached = attach::attach_all(&registry, config);
    log::info!("{} device(s) attached", attached.len());
    if registry.is_empty() {
        return Err(DeviceError::NotFound.into());
    }
    Ok(registry)
}

/// The requested node, or the first published one.
pub(super) fn select_node(registry: &Registry, node: Option<&str>) -> Result<NodeId> {
    match node {
        Some(name) => registry
            .resolve(name)
            .ok_or_else(|| ArduError::Config(format!("invalid node name: {name}"))),
        None => registry
            .nodes()
            .first()
            .map(|(node, _)| *node)
            .ok_or(ArduError::Device(DeviceError::NotFound)),
    }
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    // `config` reports problems itself instead of failing on them
    if !matches!(cmd, Command::Config { .. }) {
        config.validate()?;
    }
    match cmd {
        Command::Devices => devices::cmd_devices(&config, json),
        Command::Probe => probe::cmd_probe(&config, json),
        Command::Read {
            node,
            bytes,
            nonblock,
            hex,
        } => {
            let mode = if nonblock {
                ReadMode::NonBlocking
            } else {
                ReadMode::Blocking
            };
            read::cmd_read(&config, node.as_deref(), bytes, mode, hex, json)
        }
        Command::Stream { node, keep_first } => {
            stream::cmd_stream(&config, node.as_deref(), keep_first, json)
        }
        Command::Config { save } => config_cmd::cmd_config(&config, config_path, save, json),
    }
}
