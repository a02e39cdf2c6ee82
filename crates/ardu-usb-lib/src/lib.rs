//! ardu-usb: blocking reads over the bulk-in endpoint of Arduino-class USB devices.

pub mod attach;
pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
mod pipeline;
pub mod protocol;
pub mod registry;
pub mod transfer;
pub mod transport;

pub use device::{DeviceError, ReadMode};
pub use error::ArduError;
pub use lifecycle::{DisconnectPolicy, Handle, Interrupter, disconnect, open};
pub use registry::{NodeId, Registry};
