//! Configuration module for devserve.
//!
//! This module handles parsing, validation, and access to the settings the
//! lifecycle manager runs with: interpreter commands, the bind interface and
//! the timing windows used while starting and stopping servers. Settings are
//! read from JSON files or strings; every field is optional.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use devserve::config::{Config, validate_config};
//!
//! let config = Config::from_file("devserve.json").unwrap();
//! validate_config(&config).unwrap();
//! println!("Python servers run with {}", config.python_command);
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use devserve::config::Config;
//!
//! let config = Config {
//!     bind_host: "127.0.0.1".to_string(),
//!     grace_period_ms: 2_000,
//!     ..Config::default()
//! };
//! assert_eq!(config.grace_period().as_secs(), 2);
//! ```
mod parser;
pub mod validator;

pub use parser::{Config, DEFAULT_GRACE_PERIOD_MS, DEFAULT_PORT};
pub use validator::validate_config;
