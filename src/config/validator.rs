use crate::config::Config;
use crate::error::{Error, Result};
use std::net::IpAddr;

/// Validates the commands used to launch external servers
pub fn validate_commands(config: &Config) -> Result<()> {
    if config.python_command.trim().is_empty() {
        return Err(Error::ConfigInvalid("pythonCommand is empty".to_string()));
    }

    if config.php_command.trim().is_empty() {
        return Err(Error::ConfigInvalid("phpCommand is empty".to_string()));
    }

    Ok(())
}

/// Validates timing and sizing values
pub fn validate_limits(config: &Config) -> Result<()> {
    if config.grace_period_ms == 0 {
        return Err(Error::ConfigInvalid(
            "gracePeriodMs must be greater than zero".to_string(),
        ));
    }

    if config.static_workers == 0 {
        return Err(Error::ConfigInvalid(
            "staticWorkers must be greater than zero".to_string(),
        ));
    }

    if config.log_history == 0 || config.event_history == 0 {
        return Err(Error::ConfigInvalid(
            "logHistory and eventHistory must be greater than zero".to_string(),
        ));
    }

    if config.early_output_lines == 0 {
        return Err(Error::ConfigInvalid(
            "earlyOutputLines must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    config.bind_host.parse::<IpAddr>().map_err(|e| {
        Error::ConfigInvalid(format!("bindHost '{}' is not an IP address: {}", config.bind_host, e))
    })?;

    validate_commands(config)?;
    validate_limits(config)?;

    Ok(())
}
