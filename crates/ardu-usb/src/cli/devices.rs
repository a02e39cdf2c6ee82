//! `devices` subcommand: list matching devices on the bus.

use super::{Config, DevicesOutput, Result, attach};

pub(super) fn cmd_devices(config: &Config, json: bool) -> Result<()> {
    let devices = attach::enumerate_devices(config);

    if json {
        let output = DevicesOutput {
            count: devices.len(),
            devices,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(std::io::Error::other)?
        );
        return Ok(());
    }

    if devices.is_empty() {
        println!(
            "No devices found matching {:04x}:{:04x}.",
            config.vendor_id, config.product_id
        );
        return Ok(());
    }

    println!(
        "Found {} device{}:",
        devices.len(),
        if devices.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, dev) in devices.iter().enumerate() {
        println!(
            "  [{}] {} [{:04x}:{:04x}] {}",
            i + 1,
            dev.path,
            dev.vendor_id,
            dev.product_id,
            dev.product
        );
        if let Some(ref serial) = dev.serial {
            println!("      Serial: {serial}");
        }
    }

    Ok(())
}
