//! Node registry: the externally addressable names of attached devices.
//!
//! The registry is owned by whoever drives attachment and is passed by
//! reference to [`lifecycle::open`](crate::lifecycle::open). Each published
//! device occupies one minor number and is addressed as `<prefix><minor>`.
//! The registry's `Arc` is the environment's reference to the device.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::device::{Device, DeviceError, DeviceInfo, Result};

/// Minor number of a published device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Registry {
    prefix: String,
    max_nodes: u32,
    nodes: Mutex<BTreeMap<u32, Arc<Device>>>,
}

impl Registry {
    pub fn new(prefix: impl Into<String>, max_nodes: u32) -> Self {
        Self {
            prefix: prefix.into(),
            max_nodes,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.node_prefix.clone(), config.max_nodes)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, Arc<Device>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Node name, e.g. `ardu0`.
    pub fn name(&self, node: NodeId) -> String {
        format!("{}{}", self.prefix, node.0)
    }

    /// Parse `ardu3`, `/dev/ardu3` or a bare `3` into a node id.
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        let name = name.trim();
        let name = name.strip_prefix("/dev/").unwrap_or(name);
        let minor = name.strip_prefix(self.prefix.as_str()).unwrap_or(name);
        minor.parse().ok().map(NodeId)
    }

    /// Publish a device under the lowest free minor, taking over the
    /// caller's reference.
    pub fn publish(&self, device: Arc<Device>) -> Result<NodeId> {
        let mut nodes = self.lock();
        let minor = (0..self.max_nodes)
            .find(|m| !nodes.contains_key(m))
            .ok_or_else(|| {
                DeviceError::Busy(format!(
                    "publish: all {} {} nodes in use",
                    self.max_nodes, self.prefix
                ))
            })?;
        log::info!(
            "{}{minor}: {} [{:04x}:{:04x}] ep 0x{:02x}, {} byte chunks",
            self.prefix,
            device.info().path,
            device.info().vendor_id,
            device.info().product_id,
            device.info().endpoint,
            device.info().capacity
        );
        nodes.insert(minor, device);
        Ok(NodeId(minor))
    }

    /// Remove a node and hand back the registry's reference.
    pub fn unpublish(&self, node: NodeId) -> Option<Arc<Device>> {
        self.lock().remove(&node.0)
    }

    /// A new strong reference to the device published under `node`.
    pub fn lookup(&self, node: NodeId) -> Option<Arc<Device>> {
        self.lock().get(&node.0).cloned()
    }

    /// Node of the device at bus location `path`, if published.
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        self.lock()
            .iter()
            .find(|(_, dev)| dev.info().path == path)
            .map(|(&minor, _)| NodeId(minor))
    }

    /// Published nodes in minor order.
    pub fn nodes(&self) -> Vec<(NodeId, DeviceInfo)> {
        self.lock()
            .iter()
            .map(|(&minor, dev)| (NodeId(minor), dev.info().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
