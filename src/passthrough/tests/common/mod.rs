//! Scripted container host for negotiation tests.
//!
//! The fake reads the real configuration file on every start and decides how
//! the container behaves from the capability blocks present in it.

#![allow(dead_code)]

use async_trait::async_trait;
use passthrough::config_store::managed_fragments;
use passthrough::{
    CapabilityCatalog, ContainerConfigStore, ContainerControl, ContainerStatus, ExecResult,
    FailureClassifier, FragmentMarker, LifecycleError, NegotiationEngine, NegotiationTimeouts,
    NegotiatorConfig, ReadinessProbe, StartOutput,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_CONFIG: &str = "arch: amd64\n\
cores: 4\n\
hostname: desktop\n\
memory: 8192\n\
net0: name=eth0,bridge=vmbr0,ip=dhcp,type=veth\n\
ostype: ubuntu\n\
rootfs: local-lvm:vm-105-disk-0,size=32G\n\
unprivileged: 0\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Boots,
    FailsToStart,
    /// Starts, prints the monitor socket signature, and is live anyway
    Unstable,
    /// Starts cleanly but never answers the probe
    Hangs,
    /// `start` itself never returns in time
    StartHangs,
}

/// Rewrite of the configuration done by the host while starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tamper {
    /// Drop the capability's end marker line
    DropEndMarker,
    /// Append a directive at the end of the file
    AppendLine(&'static str),
}

#[derive(Default)]
struct HostState {
    running: bool,
    live: bool,
    poisoned: bool,
    /// Configuration text seen by each start, in order
    starts: Vec<String>,
    stops: usize,
}

pub struct FakeHost {
    config_path: PathBuf,
    host_paths: HashSet<PathBuf>,
    rules: Vec<(String, Behavior)>,
    baseline: Behavior,
    poisoned_by: Option<String>,
    tampers: Vec<(String, Tamper)>,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(config_path: &Path) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
            host_paths: HashSet::new(),
            rules: Vec::new(),
            baseline: Behavior::Boots,
            poisoned_by: None,
            tampers: Vec::new(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_devices(mut self, paths: &[&str]) -> Self {
        self.host_paths.extend(paths.iter().map(PathBuf::from));
        self
    }

    pub fn with_all_devices(self) -> Self {
        self.with_devices(&[
            "/dev/dri/renderD128",
            "/dev/dri/card0",
            "/dev/input",
            "/dev/uinput",
        ])
    }

    /// Behaviour whenever `capability`'s block is in the configuration.
    pub fn when_present(mut self, capability: &str, behavior: Behavior) -> Self {
        self.rules.push((capability.to_string(), behavior));
        self
    }

    pub fn with_baseline(mut self, behavior: Behavior) -> Self {
        self.baseline = behavior;
        self
    }

    /// After booting with `capability` once, every later start fails.
    pub fn poisoned_by(mut self, capability: &str) -> Self {
        self.poisoned_by = Some(capability.to_string());
        self
    }

    /// Rewrite the configuration while starting with `capability` present.
    pub fn tampers_when_present(mut self, capability: &str, tamper: Tamper) -> Self {
        self.tampers.push((capability.to_string(), tamper));
        self
    }

    fn tamper(&self, text: &str, present: &[String]) {
        for (capability, tamper) in &self.tampers {
            if !present.contains(capability) {
                continue;
            }
            let rewritten = match tamper {
                Tamper::DropEndMarker => {
                    let end = FragmentMarker::new(capability).end();
                    text.split_inclusive('\n')
                        .filter(|line| line.trim_end() != end)
                        .collect::<String>()
                }
                Tamper::AppendLine(line) => format!("{text}{line}\n"),
            };
            std::fs::write(&self.config_path, rewritten).unwrap();
        }
    }

    pub fn starts(&self) -> Vec<String> {
        self.state.lock().unwrap().starts.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

#[async_trait]
impl ContainerControl for FakeHost {
    async fn start(&self, _id: &str) -> Result<StartOutput, LifecycleError> {
        let text = std::fs::read_to_string(&self.config_path)
            .map_err(|e| LifecycleError::Runtime(e.to_string()))?;
        let present = managed_fragments(&text);
        let behavior = self
            .rules
            .iter()
            .find(|(cap, _)| present.iter().any(|p| p == cap))
            .map(|(_, b)| *b)
            .unwrap_or(self.baseline);

        {
            let mut state = self.state.lock().unwrap();
            state.starts.push(text.clone());
            if state.poisoned {
                state.running = false;
                return Ok(StartOutput::failed(
                    "lxc-start: 105: cgroups/cgfsng.c: cgroup_apply failed\nstartup for container '105' failed",
                ));
            }
            if let Some(poison) = &self.poisoned_by {
                if present.iter().any(|p| p == poison) {
                    state.poisoned = true;
                }
            }
        }

        self.tamper(&text, &present);

        if behavior == Behavior::StartHangs {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        let mut state = self.state.lock().unwrap();
        Ok(match behavior {
            Behavior::Boots => {
                state.running = true;
                state.live = true;
                StartOutput::succeeded("")
            }
            Behavior::FailsToStart | Behavior::StartHangs => {
                state.running = false;
                StartOutput::failed(
                    "lxc-start: 105: conf.c: mount failed\nstartup for container '105' failed",
                )
            }
            Behavior::Unstable => {
                state.running = true;
                state.live = true;
                StartOutput::succeeded("lxc-start: 105: monitor socket timed out")
            }
            Behavior::Hangs => {
                state.running = true;
                state.live = false;
                StartOutput::succeeded("")
            }
        })
    }

    async fn stop(&self, _id: &str) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.live = false;
        state.stops += 1;
        Ok(())
    }

    async fn status(&self, _id: &str) -> Result<ContainerStatus, LifecycleError> {
        let state = self.state.lock().unwrap();
        Ok(if state.running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        })
    }

    async fn exec(&self, _id: &str, _cmd: &[String]) -> Result<ExecResult, LifecycleError> {
        let state = self.state.lock().unwrap();
        if !state.running {
            return Err(LifecycleError::Runtime("CT 105 not running".to_string()));
        }
        Ok(ExecResult {
            exit_code: if state.live { 0 } else { 1 },
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn host_path_exists(&self, path: &Path) -> bool {
        self.host_paths.contains(path)
    }
}

/// A temp dir holding `105.conf` with [`BASE_CONFIG`].
pub fn container_config() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("105.conf");
    std::fs::write(&path, BASE_CONFIG).expect("Failed to write container config");
    (dir, path)
}

/// Engine with the standard catalog and short timeouts.
pub fn engine(host: Arc<FakeHost>, config_path: &Path) -> NegotiationEngine {
    engine_with_config(host, config_path, &NegotiatorConfig::default())
}

pub fn engine_with_config(
    host: Arc<FakeHost>,
    config_path: &Path,
    config: &NegotiatorConfig,
) -> NegotiationEngine {
    let control: Arc<dyn ContainerControl> = host;
    NegotiationEngine::new(
        control,
        ContainerConfigStore::new(config_path),
        CapabilityCatalog::from_devices(&config.devices),
        FailureClassifier::from_config(&config.classifier, &config.signatures).unwrap(),
        ReadinessProbe::new(vec!["true".to_string()], Duration::from_millis(5)),
    )
    .with_timeouts(NegotiationTimeouts {
        start: Duration::from_millis(500),
        probe: Duration::from_millis(100),
    })
}
