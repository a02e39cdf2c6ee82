//! Unified error type for the ardu-usb-lib crate.
//!
//! [`ArduError`] wraps [`DeviceError`], I/O errors from config persistence,
//! and config validation failures so `?` works across module boundaries.

use std::fmt;

use crate::config::ValidationError;
use crate::device::DeviceError;

#[derive(Debug)]
pub enum ArduError {
    /// Open, read, attach or init failure.
    Device(DeviceError),
    /// Standard I/O error (config file read/write).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for ArduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArduError::Device(e) => write!(f, "{e}"),
            ArduError::Io(e) => write!(f, "I/O error: {e}"),
            ArduError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for ArduError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArduError::Device(e) => Some(e),
            ArduError::Io(e) => Some(e),
            ArduError::Config(_) => None,
        }
    }
}

impl From<DeviceError> for ArduError {
    fn from(e: DeviceError) -> Self {
        ArduError::Device(e)
    }
}

impl From<std::io::Error> for ArduError {
    fn from(e: std::io::Error) -> Self {
        ArduError::Io(e)
    }
}

impl From<Vec<ValidationError>> for ArduError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
        ArduError::Config(joined.join("; "))
    }
}

/// Crate-level Result alias using [`ArduError`].
pub type Result<T> = std::result::Result<T, ArduError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_device_error() {
        let e: ArduError = DeviceError::NoDevice.into();
        assert!(matches!(e, ArduError::Device(DeviceError::NoDevice)));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: ArduError = io_err.into();
        assert!(matches!(e, ArduError::Io(_)));
    }

    #[test]
    fn from_validation_errors_joins_messages() {
        let e: ArduError = vec![ValidationError::NoNodes, ValidationError::ZeroVendorId].into();
        assert_eq!(
            e.to_string(),
            "Config error: max_nodes must be at least 1; vendor_id cannot be 0"
        );
    }

    #[test]
    fn display_device_error_is_transparent() {
        let e = ArduError::Device(DeviceError::NotFound);
        assert_eq!(e.to_string(), "Device not found");
    }

    #[test]
    fn source_chains_device_error() {
        let e = ArduError::Device(DeviceError::Io {
            code: 32,
            detail: "endpoint stalled".into(),
        });
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("stalled"));
    }

    #[test]
    fn source_none_for_config() {
        let e = ArduError::Config("bad".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_device_to_ardu() {
        fn inner() -> crate::device::Result<()> {
            Err(DeviceError::WouldBlock)
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(
            outer().unwrap_err(),
            ArduError::Device(DeviceError::WouldBlock)
        ));
    }
}
