/// Error handling module for devserve.
///
/// This module defines the error types used throughout the library.
/// Every failure a caller can observe maps onto an [`ErrorKind`], which is
/// what the notification channel carries to the GUI.
///
/// # Example
///
/// ```
/// use devserve::error::{Error, ErrorKind, Result};
///
/// fn describe(result: Result<()>) -> String {
///     match result {
///         Ok(_) => "Operation succeeded".to_string(),
///         Err(Error::PortInUse(port)) => format!("Pick another port than {}", port),
///         Err(e) if e.kind() == ErrorKind::EntryPointMissing => format!("Wrong folder: {}", e),
///         Err(e) => format!("Other error: {}", e),
///     }
/// }
/// ```
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the devserve library.
///
/// Each variant carries enough context to produce one actionable message for
/// the user: what was missing, which port collided, which program could not
/// be found.
#[derive(Error, Debug)]
pub enum Error {
    /// The launch request itself is malformed.
    ///
    /// This error occurs when:
    /// - The port is 0, negative or larger than 65535
    /// - The project folder does not exist, is not a directory or is unreadable
    #[error("Invalid launch request: {0}")]
    InvalidRequest(String),

    /// The project folder lacks the file the selected server type needs.
    #[error("{file} not found in {}. Please make sure the project structure matches the selected server type", .folder.display())]
    EntryPointMissing {
        /// Expected entry point file name(s)
        file: String,
        /// Folder that was searched
        folder: PathBuf,
    },

    /// The port is already bound, either at probe time or when the server
    /// tried to bind it.
    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// The server could not be launched at all.
    ///
    /// This error occurs when:
    /// - The interpreter or executable cannot be found
    /// - The in-process listener cannot be created
    #[error("Failed to launch server: {0}")]
    LaunchFailed(String),

    /// The server process died within the liveness window.
    #[error("Server exited immediately ({status}){}", format_output(.output))]
    ImmediateExit {
        /// Human readable exit status
        status: String,
        /// Output captured before the exit
        output: Vec<String>,
    },

    /// Another start or stop is currently in flight.
    #[error("Another start or stop operation is already in progress")]
    OperationInProgress,

    /// Stop was requested while no server is running.
    #[error("Server is not running")]
    NotRunning,

    /// The server ignored graceful termination and was killed.
    #[error("Server did not exit within {0:?} and was killed")]
    TerminationTimeout(Duration),

    /// Failed to parse configuration from a file or string.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Underlying I/O failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_output(output: &[String]) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {}", output.join(" | "))
    }
}

impl Error {
    /// The discriminant reported to observers alongside the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::EntryPointMissing { .. } => ErrorKind::EntryPointMissing,
            Error::PortInUse(_) => ErrorKind::PortInUse,
            Error::LaunchFailed(_) => ErrorKind::LaunchFailed,
            Error::ImmediateExit { .. } => ErrorKind::ImmediateExit,
            Error::OperationInProgress => ErrorKind::OperationInProgress,
            Error::NotRunning => ErrorKind::NotRunning,
            Error::TerminationTimeout(_) => ErrorKind::TerminationTimeout,
            Error::ConfigParse(_) | Error::ConfigInvalid(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Copyable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidRequest,
    EntryPointMissing,
    PortInUse,
    LaunchFailed,
    ImmediateExit,
    OperationInProgress,
    NotRunning,
    TerminationTimeout,
    Config,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result type for devserve operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_exit_message_includes_output() {
        let err = Error::ImmediateExit {
            status: "exit status: 1".to_string(),
            output: vec!["ModuleNotFoundError: No module named 'flask'".to_string()],
        };

        let message = err.to_string();
        assert!(message.contains("exit status: 1"));
        assert!(message.contains("No module named 'flask'"));
        assert_eq!(err.kind(), ErrorKind::ImmediateExit);
    }

    #[test]
    fn test_entry_point_message_names_file_and_folder() {
        let err = Error::EntryPointMissing {
            file: "manage.py".to_string(),
            folder: PathBuf::from("/proj"),
        };

        let message = err.to_string();
        assert!(message.contains("manage.py"));
        assert!(message.contains("/proj"));
        assert_eq!(err.kind(), ErrorKind::EntryPointMissing);
    }
}
