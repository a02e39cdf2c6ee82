//! Device discovery, probing and attachment.
//!
//! Matching devices are found by vendor/product id, their descriptors are
//! walked to pick the bulk-in endpoint, the CDC-ACM handshake is run on the
//! communication interface, and the device is published in the [`Registry`].
//! [`rescan`] reconciles the registry with what is currently on the bus.

use serde::Serialize;

use crate::config::Config;
use crate::lifecycle::{self, DisconnectPolicy};
use crate::protocol::{
    CDC_LINE_DTR, CDC_LINE_RTS, CDC_SET_CONTROL_LINE_STATE, CDC_SET_LINE_CODING, CLASS_CDC_COMM,
    CLASS_CDC_DATA, ENDPOINT_DIR_IN, ENDPOINT_XFER_BULK, ENDPOINT_XFER_MASK, line_coding_8n1,
};
use crate::registry::{NodeId, Registry};

// ── Descriptor summaries ──

/// Standard interface descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSummary {
    pub length: u8,
    pub descriptor_type: u8,
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
    pub endpoints: Vec<EndpointSummary>,
}

/// Standard endpoint descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub length: u8,
    pub descriptor_type: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: usize,
    pub interval: u8,
}

impl EndpointSummary {
    pub fn is_bulk_in(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
            && self.attributes & ENDPOINT_XFER_MASK == ENDPOINT_XFER_BULK
    }
}

/// The endpoint reads are served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkIn {
    pub interface: u8,
    pub endpoint: u8,
    pub capacity: usize,
}

/// First bulk-in endpoint, preferring the CDC data interface.
pub fn select_bulk_in(interfaces: &[InterfaceSummary]) -> Option<BulkIn> {
    let first_in = |pred: &dyn Fn(&InterfaceSummary) -> bool| {
        interfaces.iter().filter(|i| pred(i)).find_map(|iface| {
            iface
                .endpoints
                .iter()
                .find(|ep| ep.is_bulk_in())
                .map(|ep| BulkIn {
                    interface: iface.number,
                    endpoint: ep.address,
                    capacity: ep.max_packet_size,
                })
        })
    };
    first_in(&|i| i.class == CLASS_CDC_DATA).or_else(|| first_in(&|_| true))
}

/// Interface number of the CDC communication interface, if the device has one.
pub fn comm_interface(interfaces: &[InterfaceSummary]) -> Option<u8> {
    interfaces
        .iter()
        .find(|i| i.class == CLASS_CDC_COMM)
        .map(|i| i.number)
}

// ── Init handshake ──

/// One class request, interface recipient, host-to-device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

/// `SET_LINE_CODING` (8N1 at `baud_rate`) then `SET_CONTROL_LINE_STATE`
/// raising DTR and RTS.
pub fn init_sequence(baud_rate: u32, comm_interface: u8) -> [ControlRequest; 2] {
    [
        ControlRequest {
            request: CDC_SET_LINE_CODING,
            value: 0,
            index: u16::from(comm_interface),
            data: line_coding_8n1(baud_rate).to_vec(),
        },
        ControlRequest {
            request: CDC_SET_CONTROL_LINE_STATE,
            value: CDC_LINE_DTR | CDC_LINE_RTS,
            index: u16::from(comm_interface),
            data: Vec::new(),
        },
    ]
}

fn log_descriptors(path: &str, interfaces: &[InterfaceSummary]) {
    for iface in interfaces {
        log::debug!(
            "{path}: interface bLength={} bDescriptorType={} bInterfaceNumber={} \
             bAlternateSetting={} bNumEndpoints={} class=0x{:02x} subclass=0x{:02x} \
             protocol=0x{:02x} iInterface={}",
            iface.length,
            iface.descriptor_type,
            iface.number,
            iface.alternate_setting,
            iface.num_endpoints,
            iface.class,
            iface.subclass,
            iface.protocol,
            iface.string_index
        );
        for ep in &iface.endpoints {
            log::debug!(
                "{path}:   endpoint bEndpointAddress=0x{:02x} bmAttributes=0x{:02x} \
                 wMaxPacketSize={} bInterval={}",
                ep.address,
                ep.attributes,
                ep.max_packet_size,
                ep.interval
            );
        }
    }
}

// ── Enumeration and probing ──

/// A matching device on the bus (not opened).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    /// Bus location, `usb:<bus>/<address>`.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: String,
    pub serial: Option<String>,
}

/// Descriptor dump of one matching device.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub device: DiscoveredDevice,
    pub interfaces: Vec<InterfaceSummary>,
    pub bulk_in: Option<BulkIn>,
    pub comm_interface: Option<u8>,
}

/// Enumerate devices matching the configured id pair.
///
/// On unsupported platforms, always returns an empty list.
pub fn enumerate_devices(config: &Config) -> Vec<DiscoveredDevice> {
    #[cfg(target_os = "linux")]
    {
        linux_impl::enumerate(config)
            .into_iter()
            .map(|(dev, _)| dev)
            .collect()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Vec::new()
    }
}

/// Open each matching device and read its interface and endpoint descriptors.
///
/// Devices that cannot be opened are skipped with a warning.
pub fn describe(config: &Config) -> Vec<ProbeReport> {
    #[cfg(target_os = "linux")]
    {
        linux_impl::describe(config)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Vec::new()
    }
}

// ── Attachment ──

/// Nodes published and torn down by one [`rescan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub attached: Vec<NodeId>,
    pub detached: Vec<NodeId>,
}

/// Attach every matching device that is not yet published.
///
/// Failures (open, no bulk-in endpoint, init handshake, no free node) are
/// logged and the device is skipped; it is never published half-initialized.
pub fn attach_all(registry: &Registry, config: &Config) -> Vec<NodeId> {
    #[cfg(target_os = "linux")]
    {
        linux_impl::attach_all(registry, config)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (registry, config);
        Vec::new()
    }
}

/// Disconnect every published node whose bus location is not in `present`.
pub fn detach_missing(
    registry: &Registry,
    present: &[String],
    policy: DisconnectPolicy,
) -> Vec<NodeId> {
    let mut detached = Vec::new();
    for (node, info) in registry.nodes() {
        if present.iter().any(|p| *p == info.path) {
            continue;
        }
        match lifecycle::disconnect(registry, node, policy) {
            Ok(()) => detached.push(node),
            Err(e) => log::debug!("{}: already gone: {e}", registry.name(node)),
        }
    }
    detached
}

/// Reconcile the registry with the bus: disconnect vanished devices, then
/// attach new ones.
pub fn rescan(registry: &Registry, config: &Config) -> RescanReport {
    let present: Vec<String> = enumerate_devices(config)
        .into_iter()
        .map(|d| d.path)
        .collect();
    let detached = detach_missing(registry, &present, config.disconnect_policy());
    let attached = attach_all(registry, config);
    RescanReport { attached, detached }
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use std::time::Duration;

    use nusb::transfer::{Control, ControlType, EndpointType, Recipient};

    use crate::device::{Device, DeviceError, DeviceInfo, Result};
    use crate::protocol::CONTROL_TIMEOUT_MS;
    use crate::transport::NusbTransport;

    const INTERFACE_DESCRIPTOR_LEN: u8 = 9;
    const INTERFACE_DESCRIPTOR_TYPE: u8 = 4;
    const ENDPOINT_DESCRIPTOR_LEN: u8 = 7;
    const ENDPOINT_DESCRIPTOR_TYPE: u8 = 5;

    pub(super) fn enumerate(config: &Config) -> Vec<(DiscoveredDevice, nusb::DeviceInfo)> {
        let Ok(devices) = nusb::list_devices() else {
            return Vec::new();
        };
        devices
            .filter(|dev| dev.vendor_id() == config.vendor_id && dev.product_id() == config.product_id)
            .map(|dev| {
                let discovered = DiscoveredDevice {
                    path: format!("usb:{:03}/{:03}", dev.bus_number(), dev.device_address()),
                    vendor_id: dev.vendor_id(),
                    product_id: dev.product_id(),
                    product: dev.product_string().unwrap_or_default().to_string(),
                    serial: dev.serial_number().map(|s| s.to_string()),
                };
                (discovered, dev)
            })
            .collect()
    }

    fn attributes(transfer_type: EndpointType) -> u8 {
        match transfer_type {
            EndpointType::Control => 0,
            EndpointType::Isochronous => 1,
            EndpointType::Bulk => ENDPOINT_XFER_BULK,
            EndpointType::Interrupt => 3,
        }
    }

    fn read_interfaces(device: &nusb::Device) -> Result<Vec<InterfaceSummary>> {
        let config = device
            .active_configuration()
            .map_err(|e| DeviceError::OpenFailed(format!("active configuration: {e}")))?;
        Ok(config
            .interface_alt_settings()
            .map(|alt| InterfaceSummary {
                length: INTERFACE_DESCRIPTOR_LEN,
                descriptor_type: INTERFACE_DESCRIPTOR_TYPE,
                number: alt.interface_number(),
                alternate_setting: alt.alternate_setting(),
                num_endpoints: alt.num_endpoints(),
                class: alt.class(),
                subclass: alt.subclass(),
                protocol: alt.protocol(),
                string_index: alt.string_index().unwrap_or(0),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointSummary {
                        length: ENDPOINT_DESCRIPTOR_LEN,
                        descriptor_type: ENDPOINT_DESCRIPTOR_TYPE,
                        address: ep.address(),
                        attributes: attributes(ep.transfer_type()),
                        max_packet_size: ep.max_packet_size(),
                        interval: ep.interval(),
                    })
                    .collect(),
            })
            .collect())
    }

    pub(super) fn describe(config: &Config) -> Vec<ProbeReport> {
        let mut reports = Vec::new();
        for (discovered, info) in enumerate(config) {
            let interfaces = match info.open() {
                Ok(device) => read_interfaces(&device),
                Err(e) => Err(DeviceError::OpenFailed(format!("USB open: {e}"))),
            };
            match interfaces {
                Ok(interfaces) => {
                    log_descriptors(&discovered.path, &interfaces);
                    reports.push(ProbeReport {
                        bulk_in: select_bulk_in(&interfaces),
                        comm_interface: comm_interface(&interfaces),
                        device: discovered,
                        interfaces,
                    });
                }
                Err(e) => log::warn!("{}: {e}", discovered.path),
            }
        }
        reports
    }

    fn run_init(device: &nusb::Device, baud_rate: u32, comm: u8) -> Result<()> {
        let interface = device
            .detach_and_claim_interface(comm)
            .map_err(|e| DeviceError::InitFailed(format!("claim interface {comm}: {e}")))?;
        for req in init_sequence(baud_rate, comm) {
            let control = Control {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: req.request,
                value: req.value,
                index: req.index,
            };
            interface
                .control_out_blocking(control, &req.data, Duration::from_millis(CONTROL_TIMEOUT_MS))
                .map_err(|e| {
                    DeviceError::InitFailed(format!("control_out(bRequest=0x{:02x}): {e}", req.request))
                })?;
        }
        Ok(())
    }

    fn attach_one(
        registry: &Registry,
        config: &Config,
        discovered: DiscoveredDevice,
        info: nusb::DeviceInfo,
    ) -> Result<NodeId> {
        let device = info
            .open()
            .map_err(|e| DeviceError::OpenFailed(format!("USB open: {e}")))?;
        let interfaces = read_interfaces(&device)?;
        log_descriptors(&discovered.path, &interfaces);

        let bulk = select_bulk_in(&interfaces)
            .ok_or_else(|| DeviceError::OpenFailed("no bulk-in endpoint".into()))?;
        if bulk.capacity == 0 {
            return Err(DeviceError::OpenFailed(format!(
                "endpoint 0x{:02x}: zero max packet size",
                bulk.endpoint
            )));
        }

        match comm_interface(&interfaces) {
            Some(comm) => run_init(&device, config.baud_rate, comm)?,
            None => log::debug!("{}: no CDC communication interface, skipping init", discovered.path),
        }

        let info = DeviceInfo {
            path: discovered.path,
            vendor_id: discovered.vendor_id,
            product_id: discovered.product_id,
            product: discovered.product,
            serial: discovered.serial,
            endpoint: bulk.endpoint,
            capacity: bulk.capacity,
        };
        let transport = NusbTransport::new(device, bulk.interface);
        registry.publish(Device::new(info, Box::new(transport)))
    }

    pub(super) fn attach_all(registry: &Registry, config: &Config) -> Vec<NodeId> {
        let mut attached = Vec::new();
        for (discovered, info) in enumerate(config) {
            if registry.find_by_path(&discovered.path).is_some() {
                continue;
            }
            let path = discovered.path.clone();
            match attach_one(registry, config, discovered, info) {
                Ok(node) => attached.push(node),
                Err(e) => log::warn!("{path}: not attached: {e}"),
            }
        }
        attached
    }
}
