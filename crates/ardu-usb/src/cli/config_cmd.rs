//! `config` subcommand: show the effective configuration and its file path,
//! optionally writing it back out.

use std::path::Path;

use super::{Config, ConfigOutput, Result, kv, kv_indent, kv_width};

pub(super) fn cmd_config(
    config: &Config,
    custom_path: Option<&Path>,
    save: bool,
    json: bool,
) -> Result<()> {
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    if save {
        match custom_path {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        if let Some(p) = &config_path {
            eprintln!("Config saved to {}", p.display());
        }
    }
    let config_exists = config_path.as_ref().is_some_and(|p| p.exists());
    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    };

    if json {
        let output = ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config.clone(),
            problems,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(std::io::Error::other)?
        );
        return Ok(());
    }

    let w = kv_width(
        &["Config file:"],
        &[
            "vendor_id:",
            "product_id:",
            "baud_rate:",
            "max_nodes:",
            "node_prefix:",
            "cancel_on_disconnect:",
            "rescan_interval_ms:",
        ],
    );

    match &config_path {
        Some(p) if config_exists => kv("Config file:", format_args!("{} (loaded)", p.display()), w),
        Some(p) => kv(
            "Config file:",
            format_args!("{} (not found, using defaults)", p.display()),
            w,
        ),
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Settings:");
    kv_indent("vendor_id:", format_args!("0x{:04x}", config.vendor_id), w);
    kv_indent("product_id:", format_args!("0x{:04x}", config.product_id), w);
    kv_indent("baud_rate:", config.baud_rate, w);
    kv_indent("max_nodes:", config.max_nodes, w);
    kv_indent("node_prefix:", &config.node_prefix, w);
    kv_indent(
        "cancel_on_disconnect:",
        format_args!(
            "{} ({:?})",
            config.cancel_on_disconnect,
            config.disconnect_policy()
        ),
        w,
    );
    kv_indent("rescan_interval_ms:", config.rescan_interval_ms, w);

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
