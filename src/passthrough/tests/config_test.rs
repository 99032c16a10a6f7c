use passthrough::capability::{ELEVATED_PRIVILEGES, RENDER_DEVICE};
use passthrough::config::MONITOR_SOCKET_SIGNATURE;
use passthrough::{
    CapabilityCatalog, ConfigError, FailureClassifier, NegotiatorConfig, Outcome, StartOutput,
};
use std::path::Path;
use std::time::Duration;

#[test]
fn test_partial_file_keeps_defaults() {
    let config = NegotiatorConfig::from_toml(
        r#"
[runtime]
start_timeout_secs = 90

[probe]
command = ["systemctl", "is-system-running", "--wait"]

[devices]
render_node = "/dev/dri/renderD129"
render_numbers = "226:129"
elevated_privileges = false
"#,
    )
    .unwrap();
    config.validate().unwrap();

    assert_eq!(config.runtime.start_timeout(), Duration::from_secs(90));
    assert_eq!(config.runtime.pct_binary, "pct");
    assert_eq!(config.probe.timeout(), Duration::from_secs(30));
    assert_eq!(config.probe.command[0], "systemctl");
    assert_eq!(config.devices.uinput_numbers, "10:223");
    assert_eq!(config.signatures.len(), 1);
    assert_eq!(config.signatures[0].name, MONITOR_SOCKET_SIGNATURE);

    let catalog = CapabilityCatalog::from_devices(&config.devices);
    assert!(catalog.get(ELEVATED_PRIVILEGES).is_none());
    let render = catalog.get(RENDER_DEVICE).unwrap();
    assert!(render
        .config_fragment
        .contains(&"lxc.cgroup2.devices.allow: c 226:129 rwm".to_string()));
}

#[test]
fn test_custom_signatures_replace_defaults() {
    let config = NegotiatorConfig::from_toml(
        r#"
[[signatures]]
name = "seccomp-denied"
pattern = "seccomp.*denied"

[[signatures]]
name = "monitor-socket-timeout"
pattern = "monitor socket"
enabled = false
"#,
    )
    .unwrap();
    let classifier =
        FailureClassifier::from_config(&config.classifier, &config.signatures).unwrap();

    let unstable = classifier.classify(
        &StartOutput::succeeded("lxc-start: seccomp filter denied syscall 310"),
        Some(true),
    );
    assert_eq!(
        unstable,
        Outcome::StartupUnstable {
            signature: "seccomp-denied".to_string()
        }
    );
    let disabled = classifier.classify(&StartOutput::succeeded("monitor socket timed out"), Some(true));
    assert_eq!(disabled, Outcome::Ok);
}

#[test]
fn test_invalid_signature_pattern_is_config_error() {
    let config = NegotiatorConfig::from_toml(
        r#"
[[signatures]]
name = "broken"
pattern = "monitor[socket"
"#,
    )
    .unwrap();
    let err = FailureClassifier::from_config(&config.classifier, &config.signatures).unwrap_err();
    assert!(matches!(err, ConfigError::Signature { ref name, .. } if name == "broken"));
}

#[test]
fn test_load_reports_path_on_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(matches!(
        NegotiatorConfig::load(Some(&missing)),
        Err(ConfigError::Read { .. })
    ));

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[probe\ntimeout_secs = 1\n").unwrap();
    match NegotiatorConfig::load(Some(&bad)) {
        Err(ConfigError::Parse { path, .. }) => assert_eq!(path, bad),
        other => panic!("expected parse error, got {other:?}"),
    }

    let invalid = dir.path().join("invalid.toml");
    std::fs::write(&invalid, "[devices]\ncard_numbers = \"card0\"\n").unwrap();
    assert!(matches!(
        NegotiatorConfig::load(Some(&invalid)),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_sample_config_is_valid() {
    let sample = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../passthrough.toml");
    let config = NegotiatorConfig::load(Some(&sample)).unwrap();
    assert_eq!(
        config.container_config_path("105"),
        Path::new("/etc/pve/lxc/105.conf")
    );
}
