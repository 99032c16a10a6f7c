//! Negotiator configuration, loaded from `passthrough.toml`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default name of the monitor socket stall signature
pub const MONITOR_SOCKET_SIGNATURE: &str = "monitor-socket-timeout";

/// Negotiator configuration
/// Loaded from passthrough.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatorConfig {
    /// Container runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Readiness probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Host device nodes offered to the container
    #[serde(default)]
    pub devices: DeviceConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Text signatures that mark a nominally successful start as unstable
    #[serde(default = "default_signatures")]
    pub signatures: Vec<SignatureConfig>,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            probe: ProbeConfig::default(),
            devices: DeviceConfig::default(),
            classifier: ClassifierConfig::default(),
            signatures: default_signatures(),
        }
    }
}

impl NegotiatorConfig {
    /// Load configuration from an explicit path, or search the default locations.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        let config_paths = [
            PathBuf::from("passthrough.toml"),
            PathBuf::from("/etc/passthrough/passthrough.toml"),
        ];

        for path in config_paths {
            if path.exists() {
                return Self::load_file(&path);
            }
        }

        tracing::warn!("No passthrough.toml found, using defaults");
        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::info!("Loaded negotiator config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe.command.is_empty() {
            return Err(ConfigError::Invalid(
                "probe.command must not be empty".to_string(),
            ));
        }
        if self.probe.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe.interval_ms must be greater than zero".to_string(),
            ));
        }
        for (field, numbers) in [
            ("devices.render_numbers", &self.devices.render_numbers),
            ("devices.card_numbers", &self.devices.card_numbers),
            ("devices.input_numbers", &self.devices.input_numbers),
            ("devices.uinput_numbers", &self.devices.uinput_numbers),
        ] {
            if !is_device_numbers(numbers) {
                return Err(ConfigError::Invalid(format!(
                    "{} must look like 'major:minor' (minor may be '*'), got '{}'",
                    field, numbers
                )));
            }
        }
        Ok(())
    }

    /// Path of the persisted configuration for a container.
    pub fn container_config_path(&self, container_id: &str) -> PathBuf {
        self.runtime
            .config_dir
            .join(format!("{}.conf", container_id))
    }
}

fn is_device_numbers(value: &str) -> bool {
    match value.split_once(':') {
        Some((major, minor)) => {
            !major.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && (minor == "*" || (!minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit())))
        }
        None => false,
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Container control binary
    #[serde(default = "default_pct_binary")]
    pub pct_binary: String,

    /// Directory holding `<id>.conf` container configurations
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_pct_binary() -> String {
    "pct".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/pve/lxc")
}

fn default_start_timeout_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    60
}

impl RuntimeConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pct_binary: default_pct_binary(),
            config_dir: default_config_dir(),
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// Readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,

    /// Command executed inside the container; exit code 0 means live
    #[serde(default = "default_probe_command")]
    pub command: Vec<String>,
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_probe_interval_ms() -> u64 {
    500
}

fn default_probe_command() -> Vec<String> {
    vec!["test".to_string(), "-x".to_string(), "/bin/sh".to_string()]
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
            interval_ms: default_probe_interval_ms(),
            command: default_probe_command(),
        }
    }
}

/// Host device nodes and their cgroup device numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_render_node")]
    pub render_node: PathBuf,
    #[serde(default = "default_render_numbers")]
    pub render_numbers: String,

    #[serde(default = "default_card_node")]
    pub card_node: PathBuf,
    #[serde(default = "default_card_numbers")]
    pub card_numbers: String,

    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_input_numbers")]
    pub input_numbers: String,

    #[serde(default = "default_uinput_node")]
    pub uinput_node: PathBuf,
    #[serde(default = "default_uinput_numbers")]
    pub uinput_numbers: String,

    /// Offer the unconfined profile needed by the streaming server
    #[serde(default = "default_true")]
    pub elevated_privileges: bool,
}

fn default_render_node() -> PathBuf {
    PathBuf::from("/dev/dri/renderD128")
}

fn default_render_numbers() -> String {
    "226:128".to_string()
}

fn default_card_node() -> PathBuf {
    PathBuf::from("/dev/dri/card0")
}

fn default_card_numbers() -> String {
    "226:0".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("/dev/input")
}

fn default_input_numbers() -> String {
    "13:*".to_string()
}

fn default_uinput_node() -> PathBuf {
    PathBuf::from("/dev/uinput")
}

fn default_uinput_numbers() -> String {
    "10:223".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            render_node: default_render_node(),
            render_numbers: default_render_numbers(),
            card_node: default_card_node(),
            card_numbers: default_card_numbers(),
            input_dir: default_input_dir(),
            input_numbers: default_input_numbers(),
            uinput_node: default_uinput_node(),
            uinput_numbers: default_uinput_numbers(),
            elevated_privileges: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassifierConfig {
    /// Only treat a signature match as unstable when the liveness probe also fails
    #[serde(default)]
    pub confirm_unstable_with_probe: bool,
}

/// A named regular expression matched against start output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_signatures() -> Vec<SignatureConfig> {
    vec![SignatureConfig {
        name: MONITOR_SOCKET_SIGNATURE.to_string(),
        pattern: r"(?i)monitor[ -]?socket.*timed? ?out|timed? ?out.*monitor[ -]?socket".to_string(),
        enabled: true,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = NegotiatorConfig::from_toml("").unwrap();
        assert_eq!(config.runtime.pct_binary, "pct");
        assert_eq!(config.runtime.config_dir, PathBuf::from("/etc/pve/lxc"));
        assert_eq!(config.probe.timeout(), Duration::from_secs(30));
        assert_eq!(config.signatures.len(), 1);
        assert_eq!(config.signatures[0].name, MONITOR_SOCKET_SIGNATURE);
        assert!(!config.classifier.confirm_unstable_with_probe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_device_numbers_validation() {
        assert!(is_device_numbers("226:128"));
        assert!(is_device_numbers("13:*"));
        assert!(!is_device_numbers("226"));
        assert!(!is_device_numbers(":1"));
        assert!(!is_device_numbers("a:1"));
        assert!(!is_device_numbers("1:"));
    }

    #[test]
    fn test_invalid_probe_command_rejected() {
        let config = NegotiatorConfig::from_toml(
            r#"
[probe]
command = []
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_container_config_path() {
        let config = NegotiatorConfig::default();
        assert_eq!(
            config.container_config_path("105"),
            PathBuf::from("/etc/pve/lxc/105.conf")
        );
    }
}
