//! Per server-type launch policies.
//!
//! A policy knows three things about its server type: which file must exist
//! in the project folder, how to build the launch description, and how to
//! label the output streams of the launched server.
use crate::config::Config;
use crate::error::{Error, Result};
use crate::server::types::{CommandSpec, LaunchSpec, LogTag, ServerType, StreamId};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

/// Strategy for one [`ServerType`].
pub trait ServerTypePolicy: Send + Sync {
    /// The type this policy handles.
    fn server_type(&self) -> ServerType;

    /// Checks that `folder` contains the entry point the server needs.
    ///
    /// The default accepts any folder when the type has no entry points and
    /// otherwise requires one of them directly under `folder`.
    fn validate(&self, folder: &Path) -> Result<()> {
        let entry_points = self.server_type().entry_points();
        if entry_points.is_empty() {
            return Ok(());
        }

        find_entry_point(folder, entry_points)
            .map(|_| ())
            .ok_or_else(|| Error::EntryPointMissing {
                file: entry_points.join(" or "),
                folder: folder.to_path_buf(),
            })
    }

    /// Builds the launch description binding `port` on the configured host.
    fn build_launch(&self, folder: &Path, port: u16, config: &Config) -> LaunchSpec;

    /// Tag used when relaying a line read from `stream`.
    fn classify_stream(&self, stream: StreamId) -> LogTag {
        let label = self.server_type().label();
        match stream {
            StreamId::Stdout => LogTag::application(label),
            StreamId::Stderr => LogTag::server(label),
        }
    }
}

fn find_entry_point(folder: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| folder.join(name))
        .find(|path| path.is_file())
}

fn bind_host(config: &Config) -> IpAddr {
    // validate_config guarantees the host parses; fall back to all interfaces anyway
    config
        .bind_host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn python_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    env
}

/// Serves the folder from an in-process listener.
pub struct StaticFilesPolicy;

impl ServerTypePolicy for StaticFilesPolicy {
    fn server_type(&self) -> ServerType {
        ServerType::StaticFiles
    }

    fn build_launch(&self, folder: &Path, port: u16, config: &Config) -> LaunchSpec {
        LaunchSpec::StaticFiles {
            root: folder.to_path_buf(),
            host: bind_host(config),
            port,
        }
    }

    // Access logs are the only output of the in-process listener
    fn classify_stream(&self, _stream: StreamId) -> LogTag {
        LogTag::server(ServerType::StaticFiles.label())
    }
}

/// `python -m flask run` with the app pointed at `app.py` (or `wsgi.py`).
pub struct FlaskPolicy;

impl ServerTypePolicy for FlaskPolicy {
    fn server_type(&self) -> ServerType {
        ServerType::Flask
    }

    fn build_launch(&self, folder: &Path, port: u16, config: &Config) -> LaunchSpec {
        let host = bind_host(config).to_string();
        let entry = find_entry_point(folder, ServerType::Flask.entry_points())
            .unwrap_or_else(|| folder.join("app.py"));

        let mut env = python_env();
        env.insert("FLASK_APP".to_string(), entry.to_string_lossy().into_owned());
        env.insert("FLASK_RUN_HOST".to_string(), host.clone());
        env.insert("FLASK_RUN_PORT".to_string(), port.to_string());

        LaunchSpec::Command(CommandSpec {
            program: config.python_command.clone(),
            args: vec![
                "-m".to_string(),
                "flask".to_string(),
                "run".to_string(),
                "--host".to_string(),
                host,
                "--port".to_string(),
                port.to_string(),
            ],
            working_dir: folder.to_path_buf(),
            env,
            host: bind_host(config),
            port,
        })
    }
}

/// `python manage.py runserver <host>:<port>`.
pub struct DjangoPolicy;

impl ServerTypePolicy for DjangoPolicy {
    fn server_type(&self) -> ServerType {
        ServerType::Django
    }

    fn build_launch(&self, folder: &Path, port: u16, config: &Config) -> LaunchSpec {
        let manage_py = folder.join("manage.py");

        LaunchSpec::Command(CommandSpec {
            program: config.python_command.clone(),
            args: vec![
                manage_py.to_string_lossy().into_owned(),
                "runserver".to_string(),
                format!("{}:{}", bind_host(config), port),
            ],
            working_dir: folder.to_path_buf(),
            env: python_env(),
            host: bind_host(config),
            port,
        })
    }
}

/// `php -S <host>:<port> -t <folder>`.
pub struct PhpPolicy;

impl ServerTypePolicy for PhpPolicy {
    fn server_type(&self) -> ServerType {
        ServerType::Php
    }

    fn build_launch(&self, folder: &Path, port: u16, config: &Config) -> LaunchSpec {
        LaunchSpec::Command(CommandSpec {
            program: config.php_command.clone(),
            args: vec![
                "-S".to_string(),
                format!("{}:{}", bind_host(config), port),
                "-t".to_string(),
                folder.to_string_lossy().into_owned(),
            ],
            working_dir: folder.to_path_buf(),
            env: HashMap::new(),
            host: bind_host(config),
            port,
        })
    }
}

/// Selects the policy for `server_type`.
pub fn policy_for(server_type: ServerType) -> &'static dyn ServerTypePolicy {
    match server_type {
        ServerType::StaticFiles => &StaticFilesPolicy,
        ServerType::Flask => &FlaskPolicy,
        ServerType::Django => &DjangoPolicy,
        ServerType::Php => &PhpPolicy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn command(spec: LaunchSpec) -> CommandSpec {
        match spec {
            LaunchSpec::Command(spec) => spec,
            other => panic!("expected a command launch, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_for_matches_type() {
        for server_type in ServerType::ALL {
            assert_eq!(policy_for(server_type).server_type(), server_type);
        }
    }

    #[test]
    fn test_static_and_php_accept_any_folder() {
        let dir = TempDir::new().unwrap();
        assert!(policy_for(ServerType::StaticFiles).validate(dir.path()).is_ok());
        assert!(policy_for(ServerType::Php).validate(dir.path()).is_ok());
    }

    #[test]
    fn test_django_requires_manage_py() {
        let dir = TempDir::new().unwrap();
        let err = policy_for(ServerType::Django).validate(dir.path()).unwrap_err();
        assert!(matches!(err, Error::EntryPointMissing { ref file, .. } if file == "manage.py"));

        dir.child("manage.py").touch().unwrap();
        assert!(policy_for(ServerType::Django).validate(dir.path()).is_ok());
    }

    #[test]
    fn test_flask_accepts_wsgi_entry() {
        let dir = TempDir::new().unwrap();
        assert!(policy_for(ServerType::Flask).validate(dir.path()).is_err());

        dir.child("wsgi.py").touch().unwrap();
        assert!(policy_for(ServerType::Flask).validate(dir.path()).is_ok());

        let spec = command(FlaskPolicy.build_launch(dir.path(), 5000, &Config::default()));
        let expected = dir.path().join("wsgi.py").to_string_lossy().into_owned();
        assert_eq!(spec.env.get("FLASK_APP"), Some(&expected));
    }

    #[test]
    fn test_flask_launch_binds_all_interfaces() {
        let dir = TempDir::new().unwrap();
        dir.child("app.py").touch().unwrap();
        let config = Config {
            python_command: "python3".to_string(),
            ..Config::default()
        };

        let spec = command(FlaskPolicy.build_launch(dir.path(), 5000, &config));

        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["-m", "flask", "run", "--host", "0.0.0.0", "--port", "5000"]);
        assert_eq!(spec.working_dir, dir.path());
        assert_eq!(spec.env.get("FLASK_RUN_PORT").map(String::as_str), Some("5000"));
        assert_eq!(spec.env.get("FLASK_RUN_HOST").map(String::as_str), Some("0.0.0.0"));
    }

    #[test]
    fn test_django_launch_shape() {
        let folder = Path::new("/proj");
        let spec = command(DjangoPolicy.build_launch(folder, 8000, &Config::default()));

        assert_eq!(spec.args[0], "/proj/manage.py");
        assert_eq!(spec.args[1..], ["runserver", "0.0.0.0:8000"]);
    }

    #[test]
    fn test_php_launch_shape() {
        let folder = Path::new("/proj");
        let spec = command(PhpPolicy.build_launch(folder, 8080, &Config::default()));

        assert_eq!(spec.program, "php");
        assert_eq!(spec.args, vec!["-S", "0.0.0.0:8080", "-t", "/proj"]);
    }

    #[test]
    fn test_static_launch_is_in_process() {
        let spec = StaticFilesPolicy.build_launch(Path::new("/proj"), 8010, &Config::default());
        assert_eq!(
            spec,
            LaunchSpec::StaticFiles {
                root: PathBuf::from("/proj"),
                host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port: 8010,
            }
        );
    }

    #[test]
    fn test_classify_stream() {
        assert_eq!(
            FlaskPolicy.classify_stream(StreamId::Stdout),
            LogTag::application("Flask")
        );
        assert_eq!(
            DjangoPolicy.classify_stream(StreamId::Stderr),
            LogTag::server("Django")
        );
        assert_eq!(
            StaticFilesPolicy.classify_stream(StreamId::Stdout),
            LogTag::server("Static")
        );
    }
}
