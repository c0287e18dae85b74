use devserve::config::{Config, DEFAULT_PORT, validate_config};
use devserve::error::{Error, Result};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_parse_config() -> Result<()> {
    let config_str = r#"{
        "defaultPort": 5000,
        "bindHost": "127.0.0.1",
        "pythonCommand": "/opt/venv/bin/python",
        "phpCommand": "php8.3",
        "gracePeriodMs": 3000,
        "livenessDelayMs": 800,
        "readyTimeoutMs": 1000,
        "releaseTimeoutMs": 500,
        "staticWorkers": 4,
        "logHistory": 200,
        "eventHistory": 50,
        "earlyOutputLines": 10
    }"#;

    let config = Config::parse_from_str(config_str)?;

    assert_eq!(config.default_port, 5000);
    assert_eq!(config.bind_host, "127.0.0.1");
    assert_eq!(config.python_command, "/opt/venv/bin/python");
    assert_eq!(config.php_command, "php8.3");
    assert_eq!(config.grace_period(), Duration::from_secs(3));
    assert_eq!(config.liveness_delay(), Duration::from_millis(800));
    assert_eq!(config.ready_timeout(), Duration::from_secs(1));
    assert_eq!(config.release_timeout(), Duration::from_millis(500));
    assert_eq!(config.static_workers, 4);
    assert_eq!(config.log_history, 200);
    assert_eq!(config.event_history, 50);
    assert_eq!(config.early_output_lines, 10);

    validate_config(&config)?;

    Ok(())
}

#[test]
fn test_empty_config_uses_defaults() -> Result<()> {
    let config = Config::parse_from_str("{}")?;

    assert_eq!(config, Config::default());
    assert_eq!(config.default_port, DEFAULT_PORT);
    assert_eq!(config.bind_host, "0.0.0.0");
    validate_config(&config)?;

    Ok(())
}

#[test]
fn test_load_config_from_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    write!(file, r#"{{ "phpCommand": "/usr/local/bin/php" }}"#)?;

    let config = Config::from_file(file.path())?;
    assert_eq!(config.php_command, "/usr/local/bin/php");

    Ok(())
}

#[test]
fn test_missing_file_is_a_parse_error() {
    let result = Config::from_file("/definitely/not/here/devserve.json");
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_invalid_json() {
    let result = Config::parse_from_str("{ \"bindHost\": ");
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_validate_config_rejects_bad_values() {
    let bad_host = Config {
        bind_host: "localhost:80".to_string(),
        ..Config::default()
    };
    assert!(matches!(validate_config(&bad_host), Err(Error::ConfigInvalid(_))));

    let empty_python = Config {
        python_command: "  ".to_string(),
        ..Config::default()
    };
    assert!(matches!(validate_config(&empty_python), Err(Error::ConfigInvalid(_))));

    let zero_grace = Config {
        grace_period_ms: 0,
        ..Config::default()
    };
    assert!(matches!(validate_config(&zero_grace), Err(Error::ConfigInvalid(_))));

    let zero_workers = Config {
        static_workers: 0,
        ..Config::default()
    };
    assert!(matches!(validate_config(&zero_workers), Err(Error::ConfigInvalid(_))));
}
