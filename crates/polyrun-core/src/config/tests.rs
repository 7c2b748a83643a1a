use super::*;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn clear_overrides() {
    for key in [ENV_TIMEOUT_MS, ENV_PYTHON, ENV_GO, ENV_NODE, ENV_TSC] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_empty_document_yields_defaults() {
    clear_overrides();
    let config = ConfigLoader::from_str("").unwrap();
    assert_eq!(config.execution.timeout(), Duration::from_secs(10));
    assert_eq!(config.output.max_lines, 10_000);
    assert_eq!(config.output.max_bytes, 512_000);
    assert_eq!(config.runtimes.python.interpreter, "python3");
    assert!(config.runtimes.python.install_packages);
    assert_eq!(config.runtimes.go.probe_interval(), Duration::from_millis(100));
    assert_eq!(config.runtimes.go.probe_attempts, 50);
    assert_eq!(config.runtimes.go.build_timeout(), Duration::from_secs(120));
    assert_eq!(config.execution.load_timeout(), Duration::from_secs(180));
    assert_eq!(config.runtimes.typescript.compiler, "tsc");
    assert_eq!(config.logging.level, "warn");
}

#[test]
#[serial]
fn test_partial_document_keeps_other_defaults() {
    clear_overrides();
    let yaml = r#"
execution:
  timeout_ms: 2500
runtimes:
  python:
    interpreter: /usr/bin/python3.12
    install_packages: false
"#;
    let config = ConfigLoader::from_str(yaml).unwrap();
    assert_eq!(config.execution.timeout_ms, 2500);
    assert_eq!(config.execution.status_capacity, 64);
    assert_eq!(config.runtimes.python.interpreter, "/usr/bin/python3.12");
    assert!(!config.runtimes.python.install_packages);
    assert_eq!(config.runtimes.javascript.node, "node");

    let settings = config.coordinator_settings();
    assert_eq!(settings.timeout, Duration::from_millis(2500));
    assert_eq!(settings.load_timeout, Duration::from_secs(180));
}

#[test]
#[serial]
fn test_environment_overrides_file_values() {
    clear_overrides();
    std::env::set_var(ENV_TIMEOUT_MS, "750");
    std::env::set_var(ENV_NODE, "/opt/node/bin/node");
    let config = ConfigLoader::from_str("execution:\n  timeout_ms: 5000\n").unwrap();
    clear_overrides();

    assert_eq!(config.execution.timeout_ms, 750);
    assert_eq!(config.runtimes.javascript.node, "/opt/node/bin/node");
    assert_eq!(config.runtimes.typescript.node, "/opt/node/bin/node");
}

#[test]
#[serial]
fn test_invalid_timeout_override_is_rejected() {
    clear_overrides();
    std::env::set_var(ENV_TIMEOUT_MS, "ten seconds");
    let err = ConfigLoader::from_str("").unwrap_err();
    clear_overrides();
    assert!(err.to_string().contains(ENV_TIMEOUT_MS));
}

#[test]
#[serial]
fn test_validation_rejects_zero_limits() {
    clear_overrides();
    assert!(ConfigLoader::from_str("execution:\n  timeout_ms: 0\n").is_err());
    assert!(ConfigLoader::from_str("output:\n  max_lines: 0\n").is_err());
    assert!(ConfigLoader::from_str("logging:\n  level: loud\n").is_err());
    assert!(ConfigLoader::from_str("runtimes:\n  go:\n    toolchain: ''\n").is_err());
    assert!(ConfigLoader::from_str("execution:\n  load_timeout_ms: 0\n").is_err());
    assert!(ConfigLoader::from_str("runtimes:\n  go:\n    build_timeout_ms: 0\n").is_err());
}

#[test]
#[serial]
fn test_malformed_yaml_is_a_config_error() {
    clear_overrides();
    let err = ConfigLoader::from_str("execution: [1, 2").unwrap_err();
    assert!(matches!(err, PolyrunError::ConfigError(_)));
}

#[tokio::test]
#[serial]
async fn test_load_from_file() {
    clear_overrides();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "output:\n  max_lines: 200\n  max_bytes: 4096").unwrap();

    let config = load_config(file.path()).await.unwrap();
    assert_eq!(config.output.limits().max_lines, 200);
    assert_eq!(config.output.limits().max_bytes, 4096);

    let missing = load_config("/definitely/not/here.yaml").await.unwrap_err();
    assert!(missing.to_string().contains("Failed to read config file"));
}
