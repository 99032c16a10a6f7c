//! Host readiness checker for device pass-through
//!
//! This module reports which of the host device nodes the negotiator can offer.
//! It checks:
//! - Root privileges (pct and the config directory need them)
//! - The container control binary
//! - Each device node in the capability catalog

use crate::config::{DeviceConfig, NegotiatorConfig};
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Command;

/// Result of the host check
#[derive(Debug, Clone)]
pub struct SystemCheckResult {
    pub passed: bool,
    pub checks: Vec<CheckItem>,
}

/// Individual check item
#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub passed: bool,
    /// A failed optional item only means the capability will be skipped
    pub required: bool,
    pub message: String,
    pub fix_command: Option<String>,
}

impl SystemCheckResult {
    /// Returns a formatted error message if required checks failed
    pub fn error_message(&self) -> Option<String> {
        if self.passed {
            return None;
        }

        let failed_checks: Vec<_> = self
            .checks
            .iter()
            .filter(|c| !c.passed && c.required)
            .collect();

        let mut msg = String::from(
            "\n╔════════════════════════════════════════════════════════════════╗\n\
             ║  Device Pass-through - Host Requirements Not Met               ║\n\
             ╚════════════════════════════════════════════════════════════════╝\n\n",
        );

        msg.push_str("The following requirements are not satisfied:\n\n");

        for (i, check) in failed_checks.iter().enumerate() {
            msg.push_str(&format!("  {}. {} - {}\n", i + 1, check.name, check.message));
            if let Some(fix) = &check.fix_command {
                msg.push_str(&format!("     Fix: {}\n", fix));
            }
            msg.push('\n');
        }

        Some(msg)
    }

    /// Names of optional items that failed, i.e. capabilities that will be skipped
    pub fn unavailable(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed && !c.required)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Check the host for everything negotiation depends on
pub fn check_host(config: &NegotiatorConfig) -> SystemCheckResult {
    let mut checks = vec![check_root(), check_binary(&config.runtime.pct_binary)];
    checks.extend(check_devices(&config.devices));

    let passed = checks.iter().filter(|c| c.required).all(|c| c.passed);
    SystemCheckResult { passed, checks }
}

/// Check each device node of the catalog
pub fn check_devices(devices: &DeviceConfig) -> Vec<CheckItem> {
    vec![
        check_device_node("render-device", &devices.render_node, true, "amdgpu/i915/nouveau"),
        check_device_node("card-device", &devices.card_node, false, "amdgpu/i915/nouveau"),
        check_device_dir("input-tree", &devices.input_dir),
        check_device_node("uinput-device", &devices.uinput_node, false, "uinput"),
    ]
}

fn check_root() -> CheckItem {
    let is_root = nix::unistd::Uid::effective().is_root();
    CheckItem {
        name: "Running as root".to_string(),
        passed: is_root,
        required: true,
        message: if is_root {
            "Container configuration is writable".to_string()
        } else {
            "pct and /etc/pve/lxc require root".to_string()
        },
        fix_command: if is_root {
            None
        } else {
            Some("sudo passthrough negotiate <ctid>".to_string())
        },
    }
}

/// Check a device node exists and is a character device
fn check_device_node(name: &str, path: &Path, required: bool, module: &str) -> CheckItem {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_char_device() => CheckItem {
            name: name.to_string(),
            passed: true,
            required,
            message: format!("Found {}", path.display()),
            fix_command: None,
        },
        Ok(_) => CheckItem {
            name: name.to_string(),
            passed: false,
            required,
            message: format!("{} exists but is not a character device", path.display()),
            fix_command: None,
        },
        Err(_) => CheckItem {
            name: name.to_string(),
            passed: false,
            required,
            message: format!("{} not found", path.display()),
            fix_command: Some(format!("sudo modprobe {}", module)),
        },
    }
}

fn check_device_dir(name: &str, path: &Path) -> CheckItem {
    let passed = path.is_dir();
    CheckItem {
        name: name.to_string(),
        passed,
        required: false,
        message: if passed {
            format!("Found {}", path.display())
        } else {
            format!("{} not found", path.display())
        },
        fix_command: None,
    }
}

/// Check if the container control binary is installed
fn check_binary(binary: &str) -> CheckItem {
    let found = if binary.starts_with('/') {
        Path::new(binary).exists().then(|| binary.to_string())
    } else {
        Command::new("which")
            .arg(binary)
            .output()
            .ok()
            .and_then(|output| {
                if output.status.success() {
                    String::from_utf8(output.stdout)
                        .ok()
                        .map(|s| s.trim().to_string())
                } else {
                    None
                }
            })
    };

    match found {
        Some(path) => CheckItem {
            name: binary.to_string(),
            passed: true,
            required: true,
            message: format!("Found at {}", path),
            fix_command: None,
        },
        None => CheckItem {
            name: binary.to_string(),
            passed: false,
            required: true,
            message: "Not installed".to_string(),
            fix_command: Some("apt install pve-container".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_devices_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let devices = DeviceConfig {
            render_node: dir.path().join("renderD128"),
            card_node: dir.path().join("card0"),
            input_dir: dir.path().join("input"),
            uinput_node: dir.path().join("uinput"),
            ..DeviceConfig::default()
        };
        let checks = check_devices(&devices);
        assert!(checks.iter().all(|c| !c.passed));
        assert!(checks[0].required);
        assert_eq!(checks[0].fix_command.as_deref(), Some("sudo modprobe amdgpu/i915/nouveau"));
    }

    #[test]
    fn test_regular_file_is_not_a_device() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("renderD128");
        fs::write(&fake, b"").unwrap();
        let item = check_device_node("render-device", &fake, true, "amdgpu");
        assert!(!item.passed);
        assert!(item.message.contains("not a character device"));
    }

    #[test]
    fn test_input_dir_and_unavailable_list() {
        let dir = tempfile::tempdir().unwrap();
        let item = check_device_dir("input-tree", dir.path());
        assert!(item.passed);

        let result = SystemCheckResult {
            passed: true,
            checks: vec![
                item,
                check_device_dir("other", &dir.path().join("missing")),
            ],
        };
        assert_eq!(result.unavailable(), vec!["other"]);
        assert!(result.error_message().is_none());
    }

    #[test]
    fn test_missing_absolute_binary() {
        let item = check_binary("/nonexistent/bin/pct");
        assert!(!item.passed);
        assert!(item.required);
    }
}
