//! Catalog of optional hardware capabilities, in negotiation priority order.
use crate::config::DeviceConfig;
use crate::config_store::FragmentMarker;
use crate::lifecycle::ContainerControl;
use std::path::{Path, PathBuf};

pub const RENDER_DEVICE: &str = "render-device";
pub const CARD_DEVICE: &str = "card-device";
pub const INPUT_TREE: &str = "input-tree";
pub const UINPUT_DEVICE: &str = "uinput-device";
pub const ELEVATED_PRIVILEGES: &str = "elevated-privileges";

/// Host-side condition a capability needs before it is worth trying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// A device node or directory must exist on the host
    HostPath(PathBuf),
    /// Another capability must already be granted in this session
    Granted(String),
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionCheck {
    Met,
    Unmet { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub name: String,
    /// Directives granting the capability, written as one marked block
    pub config_fragment: Vec<String>,
    pub precondition: Precondition,
    /// Negotiation aborts if a required capability is unavailable
    pub required: bool,
}

impl CapabilityEntry {
    pub fn new(name: impl Into<String>, config_fragment: Vec<String>, precondition: Precondition) -> Self {
        Self {
            name: name.into(),
            config_fragment,
            precondition,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn marker(&self) -> FragmentMarker {
        FragmentMarker::new(&self.name)
    }

    /// Pass-through of a single device node or device directory.
    pub fn device(name: &str, host_path: &Path, numbers: &str, is_dir: bool) -> Self {
        let fragment = vec![
            format!("lxc.cgroup2.devices.allow: c {} rwm", numbers),
            mount_entry(host_path, is_dir),
        ];
        Self::new(name, fragment, Precondition::HostPath(host_path.to_path_buf()))
    }
}

fn mount_entry(host_path: &Path, is_dir: bool) -> String {
    let host = host_path.display().to_string();
    let target = host.trim_start_matches('/');
    format!(
        "lxc.mount.entry: {} {} none bind,optional,create={}",
        host,
        target,
        if is_dir { "dir" } else { "file" }
    )
}

/// Read-only, ordered set of capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    entries: Vec<CapabilityEntry>,
}

impl CapabilityCatalog {
    pub fn new(entries: Vec<CapabilityEntry>) -> Self {
        Self { entries }
    }

    /// The standard catalog: render → card → input tree → uinput → elevated privileges.
    pub fn from_devices(devices: &DeviceConfig) -> Self {
        let mut entries = vec![
            CapabilityEntry::device(RENDER_DEVICE, &devices.render_node, &devices.render_numbers, false)
                .required(),
            CapabilityEntry::device(CARD_DEVICE, &devices.card_node, &devices.card_numbers, false),
            CapabilityEntry::device(INPUT_TREE, &devices.input_dir, &devices.input_numbers, true),
            CapabilityEntry::device(UINPUT_DEVICE, &devices.uinput_node, &devices.uinput_numbers, false),
        ];
        if devices.elevated_privileges {
            entries.push(CapabilityEntry::new(
                ELEVATED_PRIVILEGES,
                vec![
                    "lxc.apparmor.profile: unconfined".to_string(),
                    "lxc.cap.drop:".to_string(),
                ],
                Precondition::Granted(UINPUT_DEVICE.to_string()),
            ));
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.iter().filter(|e| e.required)
    }

    pub fn optional(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.iter().filter(|e| !e.required)
    }

    /// Evaluate a precondition against the host as it is right now.
    pub async fn evaluate(
        &self,
        entry: &CapabilityEntry,
        control: &dyn ContainerControl,
        granted: &[String],
    ) -> PreconditionCheck {
        match &entry.precondition {
            Precondition::Always => PreconditionCheck::Met,
            Precondition::HostPath(path) => {
                if control.host_path_exists(path).await {
                    PreconditionCheck::Met
                } else {
                    PreconditionCheck::Unmet {
                        reason: format!("{} does not exist on the host", path.display()),
                    }
                }
            }
            Precondition::Granted(other) => {
                if granted.iter().any(|g| g == other) {
                    PreconditionCheck::Met
                } else {
                    PreconditionCheck::Unmet {
                        reason: format!("requires '{}', which was not granted", other),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let catalog = CapabilityCatalog::from_devices(&DeviceConfig::default());
        let names: Vec<&str> = catalog.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            [RENDER_DEVICE, CARD_DEVICE, INPUT_TREE, UINPUT_DEVICE, ELEVATED_PRIVILEGES]
        );
        let required: Vec<&str> = catalog.required().map(|e| e.name.as_str()).collect();
        assert_eq!(required, [RENDER_DEVICE]);
    }

    #[test]
    fn test_device_fragments() {
        let catalog = CapabilityCatalog::from_devices(&DeviceConfig::default());
        assert_eq!(
            catalog.get(RENDER_DEVICE).unwrap().config_fragment,
            vec![
                "lxc.cgroup2.devices.allow: c 226:128 rwm".to_string(),
                "lxc.mount.entry: /dev/dri/renderD128 dev/dri/renderD128 none bind,optional,create=file"
                    .to_string(),
            ]
        );
        assert_eq!(
            catalog.get(INPUT_TREE).unwrap().config_fragment[1],
            "lxc.mount.entry: /dev/input dev/input none bind,optional,create=dir"
        );
    }

    #[test]
    fn test_elevated_privileges_can_be_disabled() {
        let devices = DeviceConfig {
            elevated_privileges: false,
            ..DeviceConfig::default()
        };
        let catalog = CapabilityCatalog::from_devices(&devices);
        assert!(catalog.get(ELEVATED_PRIVILEGES).is_none());
        assert_eq!(catalog.optional().count(), 3);
    }
}
