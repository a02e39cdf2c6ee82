//! Driver configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::lifecycle::DisconnectPolicy;
use crate::protocol::{
    ARDUINO_VID, DEFAULT_BAUD_RATE, DEFAULT_MAX_NODES, DEFAULT_NODE_PREFIX, SUPPORTED_BAUD_RATES,
    UNO_PID,
};

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str = "# ardu-usb configuration. Values not listed here use defaults.\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// USB vendor id to match. Default: 0x2341 (Arduino).
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// USB product id to match. Default: 0x0043 (Uno).
    #[serde(default = "default_product_id")]
    pub product_id: u16,

    /// Line rate sent in the CDC init handshake.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Number of node minors available.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,

    /// Node name prefix; nodes are `<prefix><minor>`.
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// Cancel the outstanding transfer and wake blocked readers on unplug.
    /// When false, disconnect waits for an active read to finish on its own.
    #[serde(default = "default_true")]
    pub cancel_on_disconnect: bool,

    /// How often `stream` re-enumerates to notice unplugged devices.
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
}

fn default_vendor_id() -> u16 {
    ARDUINO_VID
}
fn default_product_id() -> u16 {
    UNO_PID
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_max_nodes() -> u32 {
    DEFAULT_MAX_NODES
}
fn default_node_prefix() -> String {
    DEFAULT_NODE_PREFIX.into()
}
fn default_rescan_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            baud_rate: default_baud_rate(),
            max_nodes: default_max_nodes(),
            node_prefix: default_node_prefix(),
            cancel_on_disconnect: true,
            rescan_interval_ms: default_rescan_interval_ms(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `vendor_id` is zero.
    ZeroVendorId,
    /// `baud_rate` is not one of the standard rates.
    UnsupportedBaudRate(u32),
    /// `max_nodes` is zero.
    NoNodes,
    /// `node_prefix` is empty, ends in a digit or contains a path separator.
    InvalidNodePrefix(String),
    /// `rescan_interval_ms` is zero.
    ZeroRescanInterval,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroVendorId => write!(f, "vendor_id cannot be 0"),
            ValidationError::UnsupportedBaudRate(b) => write!(f, "Unsupported baud rate: {b}"),
            ValidationError::NoNodes => write!(f, "max_nodes must be at least 1"),
            ValidationError::InvalidNodePrefix(e) => write!(f, "Invalid node prefix: {e}"),
            ValidationError::ZeroRescanInterval => {
                write!(f, "rescan_interval_ms must be at least 1")
            }
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ardu-usb"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist and
    /// `(defaults, [warning])` if it exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        if std::fs::rename(&tmp, path).is_err() {
            // rename can fail across filesystems
            let result = std::fs::write(path, &contents);
            let _ = std::fs::remove_file(&tmp);
            return result;
        }
        Ok(())
    }

    /// Save config to the default platform path.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::path() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No config directory",
            ));
        };
        self.save_to(&path)
    }

    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        if self.cancel_on_disconnect {
            DisconnectPolicy::CancelAndWake
        } else {
            DisconnectPolicy::WaitForCompletion
        }
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.vendor_id == 0 {
            errors.push(ValidationError::ZeroVendorId);
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            errors.push(ValidationError::UnsupportedBaudRate(self.baud_rate));
        }
        if self.max_nodes == 0 {
            errors.push(ValidationError::NoNodes);
        }
        if let Err(reason) = check_node_prefix(&self.node_prefix) {
            errors.push(ValidationError::InvalidNodePrefix(reason));
        }
        if self.rescan_interval_ms == 0 {
            errors.push(ValidationError::ZeroRescanInterval);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_node_prefix(prefix: &str) -> std::result::Result<(), String> {
    if prefix.trim().is_empty() {
        return Err("cannot be empty".into());
    }
    if let Some(c) = prefix
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(format!("\"{prefix}\" contains '{c}'"));
    }
    // a trailing digit would run into the minor number
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("\"{prefix}\" ends with a digit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults and parsing ──

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.vendor_id, 0x2341);
        assert_eq!(c.product_id, 0x0043);
        assert_eq!(c.baud_rate, 9600);
        assert_eq!(c.max_nodes, 8);
        assert_eq!(c.node_prefix, "ardu");
        assert!(c.cancel_on_disconnect);
        assert_eq!(c.rescan_interval_ms, 1000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: Config = toml::from_str("baud_rate = 115200").unwrap();
        assert_eq!(c.baud_rate, 115200);
        assert_eq!(c.vendor_id, 0x2341);
        assert_eq!(c.node_prefix, "ardu");
        assert!(c.cancel_on_disconnect);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("max_nodes = \"eight\"");
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("vendor_id = 70000");
        assert!(result.is_err());
    }

    #[test]
    fn config_path_ends_with_toml() {
        if let Some(path) = Config::path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
            assert_eq!(path.parent().unwrap().file_name().unwrap(), "ardu-usb");
        }
    }

    #[test]
    fn disconnect_policy_follows_flag() {
        let mut c = Config::default();
        assert_eq!(c.disconnect_policy(), DisconnectPolicy::CancelAndWake);
        c.cancel_on_disconnect = false;
        assert_eq!(c.disconnect_policy(), DisconnectPolicy::WaitForCompletion);
    }

    // ── validate ──

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_unsupported_baud_rate() {
        let c = Config {
            baud_rate: 12345,
            ..Config::default()
        };
        assert_eq!(
            c.validate().unwrap_err(),
            vec![ValidationError::UnsupportedBaudRate(12345)]
        );
    }

    #[test]
    fn validate_node_prefix() {
        for bad in ["", "  ", "ardu1", "dev/ardu", "ar du"] {
            let c = Config {
                node_prefix: bad.into(),
                ..Config::default()
            };
            let errs = c.validate().unwrap_err();
            assert!(
                matches!(errs[0], ValidationError::InvalidNodePrefix(_)),
                "{bad:?} accepted"
            );
        }
        let c = Config {
            node_prefix: "uno_".into(),
            ..Config::default()
        };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let c = Config {
            vendor_id: 0,
            max_nodes: 0,
            rescan_interval_ms: 0,
            ..Config::default()
        };
        let errs = c.validate().unwrap_err();
        assert_eq!(
            errs,
            vec![
                ValidationError::ZeroVendorId,
                ValidationError::NoNodes,
                ValidationError::ZeroRescanInterval,
            ]
        );
    }

    #[test]
    fn validation_error_display() {
        assert_eq!(
            ValidationError::UnsupportedBaudRate(10).to_string(),
            "Unsupported baud rate: 10"
        );
        assert_eq!(
            ValidationError::InvalidNodePrefix("cannot be empty".into()).to_string(),
            "Invalid node prefix: cannot be empty"
        );
    }

    // ── Persistence ──

    #[test]
    fn save_to_load_from_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let c = Config {
            product_id: 0x0042,
            baud_rate: 57600,
            node_prefix: "mega".into(),
            cancel_on_disconnect: false,
            ..Config::default()
        };
        c.save_to(&path).unwrap();
        let (loaded, warnings) = Config::load_from(&path);
        assert!(warnings.is_empty());
        assert_eq!(loaded, c);
    }

    #[test]
    fn save_to_includes_header_and_cleans_up_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::default().save_to(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(CONFIG_HEADER));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (c, warnings) = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(c, Config::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn load_from_invalid_toml_returns_defaults_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is { not valid toml").unwrap();
        let (c, warnings) = Config::load_from(&path);
        assert_eq!(c, Config::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("config parse error"));
    }
}
