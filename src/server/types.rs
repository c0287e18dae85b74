// src/server/types.rs
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of one server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    // Only the manager mints sessions
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of the manager's server slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServerStatus {
    /// No server occupies the slot
    Idle,
    /// A start request is being processed
    Starting,
    /// The server is up
    Running,
    /// The server is being torn down
    Stopping,
    /// The last start failed; transient, always followed by `Idle`
    Failed,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of development server to run for a project folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    StaticFiles,
    Flask,
    Django,
    Php,
}

impl ServerType {
    /// All supported types, in the order a picker should list them.
    pub const ALL: [ServerType; 4] = [
        ServerType::StaticFiles,
        ServerType::Flask,
        ServerType::Django,
        ServerType::Php,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ServerType::StaticFiles => "Static Files",
            ServerType::Flask => "Flask Application",
            ServerType::Django => "Django Application",
            ServerType::Php => "PHP Built-in Server",
        }
    }

    /// Short label used to prefix relayed log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ServerType::StaticFiles => "Static",
            ServerType::Flask => "Flask",
            ServerType::Django => "Django",
            ServerType::Php => "PHP",
        }
    }

    /// Files, any one of which must exist directly under the project folder.
    pub fn entry_points(&self) -> &'static [&'static str] {
        match self {
            ServerType::StaticFiles | ServerType::Php => &[],
            ServerType::Flask => &["app.py", "wsgi.py"],
            ServerType::Django => &["manage.py"],
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ServerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" | "static_files" | "http.server" => Ok(ServerType::StaticFiles),
            "flask" => Ok(ServerType::Flask),
            "django" => Ok(ServerType::Django),
            "php" | "php_server" => Ok(ServerType::Php),
            other => Err(Error::InvalidRequest(format!("unknown server type '{}'", other))),
        }
    }
}

/// A request to start a server. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    folder: PathBuf,
    port: u16,
    server_type: ServerType,
}

impl LaunchRequest {
    pub fn new(folder: impl Into<PathBuf>, port: u16, server_type: ServerType) -> Self {
        Self {
            folder: folder.into(),
            port,
            server_type,
        }
    }

    /// Builds a request from an untyped port value, rejecting 0, negative and
    /// overflowing numbers.
    pub fn from_raw(folder: impl Into<PathBuf>, port: i64, server_type: ServerType) -> Result<Self> {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::InvalidRequest(format!("port {} is outside 1-65535", port)))?;

        Ok(Self::new(folder, port, server_type))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Re-checks the request independently of any front-end validation.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidRequest(
                "port 0 is not a usable port".to_string(),
            ));
        }

        let metadata = std::fs::metadata(&self.folder).map_err(|e| {
            Error::InvalidRequest(format!(
                "project folder {} is not accessible: {}",
                self.folder.display(),
                e
            ))
        })?;

        if !metadata.is_dir() {
            return Err(Error::InvalidRequest(format!(
                "{} is not a folder",
                self.folder.display()
            )));
        }

        std::fs::read_dir(&self.folder).map_err(|e| {
            Error::InvalidRequest(format!(
                "project folder {} is not readable: {}",
                self.folder.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// Everything needed to start an external server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Merged over the inherited environment
    pub env: HashMap<String, String>,
    pub host: IpAddr,
    pub port: u16,
}

impl CommandSpec {
    /// Shell-like rendering, for logs only.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How a server is brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// In-process listener serving `root`
    StaticFiles { root: PathBuf, host: IpAddr, port: u16 },
    /// External process
    Command(CommandSpec),
}

impl LaunchSpec {
    pub fn host(&self) -> IpAddr {
        match self {
            LaunchSpec::StaticFiles { host, .. } => *host,
            LaunchSpec::Command(spec) => spec.host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            LaunchSpec::StaticFiles { port, .. } => *port,
            LaunchSpec::Command(spec) => spec.port,
        }
    }
}

/// Origin of a line of server output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamId {
    Stdout,
    Stderr,
}

/// Who produced a relayed log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogSource {
    /// Output of the application code
    Application,
    /// Server and access logs
    Server,
    /// Messages from the manager itself
    Manager,
}

/// Human readable prefix of a relayed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LogTag {
    pub source: LogSource,
    pub label: &'static str,
}

impl LogTag {
    pub const MANAGER: LogTag = LogTag {
        source: LogSource::Manager,
        label: "manager",
    };

    pub fn application(label: &'static str) -> Self {
        Self {
            source: LogSource::Application,
            label,
        }
    }

    pub fn server(label: &'static str) -> Self {
        Self {
            source: LogSource::Server,
            label,
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            LogSource::Application | LogSource::Manager => write!(f, "[{}]", self.label),
            LogSource::Server => write!(f, "[{} server]", self.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_rejects_out_of_range_ports() {
        for port in [0, -1, 65_536, i64::MAX] {
            let result = LaunchRequest::from_raw("/tmp", port, ServerType::StaticFiles);
            assert!(matches!(result, Err(Error::InvalidRequest(_))), "port {port}");
        }

        let request = LaunchRequest::from_raw("/tmp", 65_535, ServerType::Php).unwrap();
        assert_eq!(request.port(), 65_535);
    }

    #[test]
    fn test_validate_rejects_missing_folder() {
        let request = LaunchRequest::new("/definitely/not/here", 8000, ServerType::StaticFiles);
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_server_type_parsing() {
        assert_eq!("flask".parse::<ServerType>().unwrap(), ServerType::Flask);
        assert_eq!("http.server".parse::<ServerType>().unwrap(), ServerType::StaticFiles);
        assert_eq!("PHP".parse::<ServerType>().unwrap(), ServerType::Php);
        assert!("rails".parse::<ServerType>().is_err());
    }

    #[test]
    fn test_log_tag_display() {
        assert_eq!(LogTag::application("Flask").to_string(), "[Flask]");
        assert_eq!(LogTag::server("Django").to_string(), "[Django server]");
        assert_eq!(LogTag::MANAGER.to_string(), "[manager]");
    }
}
