//! Configuration loading as performed by the daemon binary.

use clap::Parser;
use serial_test::serial;

use driftwatch_core::config::DriftwatchConfig;
use driftwatch_daemon::cli::DaemonCli;

const CONFIG: &str = r#"
[general]
log_level = "warn"
log_format = "json"

[detector]
port = 2999
blacklist = ["statsd.*", "carbon.*"]
"#;

#[tokio::test]
#[serial]
async fn test_file_env_and_cli_layering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("driftwatch.toml");
    std::fs::write(&path, CONFIG).unwrap();

    // SAFETY: serialized test, no other thread reads the environment
    unsafe {
        std::env::set_var("DRIFTWATCH_DETECTOR_PORT", "3001");
        std::env::set_var("DRIFTWATCH_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = DriftwatchConfig::load(&path).await.unwrap();

    unsafe {
        std::env::remove_var("DRIFTWATCH_DETECTOR_PORT");
        std::env::remove_var("DRIFTWATCH_GENERAL_LOG_LEVEL");
    }

    assert_eq!(config.detector.port, 3001);
    assert_eq!(config.general.log_level, "error");
    assert_eq!(config.detector.blacklist.len(), 2);

    let cli = DaemonCli::try_parse_from([
        "driftwatch",
        "--config",
        path.to_str().unwrap(),
        "--log-level",
        "debug",
    ])
    .unwrap();
    cli.apply_overrides(&mut config);

    assert_eq!(config.general.log_level, "debug");
    assert!(config.validate().is_ok());
}

#[tokio::test]
#[serial]
async fn test_invalid_cli_override_fails_validation() {
    let mut config = DriftwatchConfig::default();
    let cli = DaemonCli::try_parse_from(["driftwatch", "--log-format", "xml"]).unwrap();
    cli.apply_overrides(&mut config);
    assert!(config.validate().is_err());
}

#[tokio::test]
#[serial]
async fn test_missing_config_file_is_an_error() {
    let result = DriftwatchConfig::load("/nonexistent/driftwatch/driftwatch.toml").await;
    assert!(result.is_err());
}

#[test]
fn test_effective_config_serializes_to_json() {
    let json = serde_json::to_value(DriftwatchConfig::default()).unwrap();
    assert_eq!(json["detector"]["port"], 2015);
    assert_eq!(json["metrics"]["enabled"], false);
}
