//! Integration tests for the `ardu-usb` binary.
//!
//! Commands that need hardware are exercised through `--help`, or against a
//! vendor/product id nothing on the test machine will match.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("ardu-usb")
}

/// Config file matching an id pair no real device uses.
fn unmatched_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "vendor_id = 0xfffe\nproduct_id = 0xfffe\n").unwrap();
    path
}

#[test]
fn cli_help_succeeds() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ardu-usb"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ── config ──

#[test]
fn cli_config_json_produces_valid_json() {
    let output = cli()
        .args(["--json", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output).expect("config --json should produce valid JSON");
    assert!(json["settings"].is_object());
    assert!(json["config_file"].is_string() || json["config_file"].is_null());
    assert!(json["problems"].is_array());
}

#[test]
fn cli_config_reads_custom_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mega.toml");
    std::fs::write(&path, "product_id = 0x0042\nnode_prefix = \"mega\"\n").unwrap();

    let output = cli()
        .args(["--json", "config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["settings"]["product_id"], 0x42);
    assert_eq!(json["settings"]["node_prefix"], "mega");
    assert_eq!(json["config_file_exists"], true);
}

#[test]
fn cli_config_save_writes_effective_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    cli()
        .args(["config", "--save", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("Config saved to"));

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("# ardu-usb configuration"));
    assert!(written.contains("node_prefix = \"ardu\""));
    assert!(written.contains("baud_rate = 9600"));
}

#[test]
fn cli_config_reports_problems_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "baud_rate = 1234\n").unwrap();

    cli()
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Unsupported baud rate: 1234"));
}

#[test]
fn cli_invalid_config_fails_other_commands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "max_nodes = 0\n").unwrap();

    cli()
        .arg("devices")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_nodes"));
}

// ── --verbose flag ──

#[test]
fn cli_verbose_flag_accepted() {
    cli().args(["-v", "config"]).assert().success();
}

#[test]
fn cli_verbose_long_flag_accepted() {
    cli().args(["--verbose", "--verbose", "config"]).assert().success();
}

// ── Device commands ──

#[test]
fn cli_devices_succeeds() {
    cli().arg("devices").assert().success();
}

#[test]
fn cli_devices_json_without_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = unmatched_config(&dir);
    let output = cli()
        .args(["--json", "devices", "--config"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["count"], 0);
    assert!(json["devices"].as_array().unwrap().is_empty());
}

#[test]
fn cli_probe_without_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = unmatched_config(&dir);
    cli()
        .args(["probe", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices found matching fffe:fffe"));
}

#[test]
fn cli_read_without_device_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = unmatched_config(&dir);
    cli()
        .args(["read", "--nonblock", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Device not found"));
}

#[test]
fn cli_read_help_succeeds() {
    cli()
        .args(["read", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--nonblock"))
        .stdout(predicate::str::contains("--bytes"));
}

#[test]
fn cli_stream_help_succeeds() {
    cli()
        .args(["stream", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--keep-first"));
}

#[test]
fn cli_probe_help_succeeds() {
    cli()
        .args(["probe", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("descriptors"));
}

#[test]
fn cli_unknown_subcommand_fails() {
    cli().arg("write").assert().failure();
}
