//! `probe` subcommand: dump interface and endpoint descriptors.

use super::{Config, Result, attach, kv, kv_indent, kv_width};

pub(super) fn cmd_probe(config: &Config, json: bool) -> Result<()> {
    let reports = attach::describe(config);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).map_err(std::io::Error::other)?
        );
        return Ok(());
    }

    if reports.is_empty() {
        println!(
            "No devices found matching {:04x}:{:04x}.",
            config.vendor_id, config.product_id
        );
        return Ok(());
    }

    let w = kv_width(
        &["Device:", "Product:", "Serial:", "Bulk-in:", "CDC comm:"],
        &["Endpoint 0x00:"],
    );

    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let dev = &report.device;
        kv(
            "Device:",
            format_args!("{} [{:04x}:{:04x}]", dev.path, dev.vendor_id, dev.product_id),
            w,
        );
        kv("Product:", &dev.product, w);
        if let Some(ref serial) = dev.serial {
            kv("Serial:", serial, w);
        }
        match report.bulk_in {
            Some(b) => kv(
                "Bulk-in:",
                format_args!(
                    "0x{:02x} on interface {}, {} byte chunks",
                    b.endpoint, b.interface, b.capacity
                ),
                w,
            ),
            None => kv("Bulk-in:", "(none, device cannot be attached)", w),
        }
        match report.comm_interface {
            Some(n) => kv("CDC comm:", format_args!("interface {n}"), w),
            None => kv("CDC comm:", "(none, init skipped)", w),
        }

        for iface in &report.interfaces {
            println!(
                "Interface {} alt {}: len={} type={} endpoints={} class=0x{:02x} \
                 subclass=0x{:02x} protocol=0x{:02x} iInterface={}",
                iface.number,
                iface.alternate_setting,
                iface.length,
                iface.descriptor_type,
                iface.num_endpoints,
                iface.class,
                iface.subclass,
                iface.protocol,
                iface.string_index
            );
            for ep in &iface.endpoints {
                kv_indent(
                    &format!("Endpoint 0x{:02x}:", ep.address),
                    format_args!(
                        "len={} type={} attributes=0x{:02x} max_packet={} interval={}",
                        ep.length,
                        ep.descriptor_type,
                        ep.attributes,
                        ep.max_packet_size,
                        ep.interval
                    ),
                    w,
                );
            }
        }
    }
    Ok(())
}
