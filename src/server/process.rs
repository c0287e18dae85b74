// src/server/process.rs
use crate::config::Config;
use crate::error::{Error, Result};
use crate::server::events::{LogSink, lock};
use crate::server::policy::ServerTypePolicy;
use crate::server::probe::PortProbe;
use crate::server::static_files;
use crate::server::types::{CommandSpec, LaunchSpec, LogTag, ServerType, SessionId, StreamId};
use actix_web::dev::{Server, ServerHandle};
use async_process::{Child, Command, Stdio};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, BufReader};
use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(2);
const PROCESS_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const LISTENER_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How a server went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    /// Human readable exit status
    pub description: String,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            description: status.to_string(),
        }
    }
}

/// Sent to the manager when a session's server has exited, requested or not.
#[derive(Debug, Clone)]
pub(crate) struct SessionExit {
    pub(crate) session: SessionId,
    pub(crate) exit: ExitInfo,
}

/// How [`ServerProcessHandle::terminate`] brought the server down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period
    Graceful,
    /// Had to be killed
    Forced,
    /// Was already gone
    AlreadyExited,
}

enum Control {
    Process {
        pid: Option<u32>,
        kill_tx: mpsc::UnboundedSender<()>,
    },
    Listener {
        handle: ServerHandle,
    },
}

/// A launched server of one session.
///
/// Owns the background tasks relaying the server's output and watching for
/// its exit. Dropping a handle that was not terminated kills the server.
pub struct ServerProcessHandle {
    session: SessionId,
    server_type: ServerType,
    host: IpAddr,
    port: u16,
    control: Control,
    sink: LogSink,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    monitor: Option<JoinHandle<()>>,
    early_output: Arc<Mutex<VecDeque<String>>>,
    terminated: bool,
}

impl ServerProcessHandle {
    /// Launch `spec` and wait until the server either proves alive or fails.
    ///
    /// Returns once the liveness delay has passed without an exit and the
    /// readiness wait is over. A server that exits early is reported as
    /// [`Error::ImmediateExit`], or [`Error::PortInUse`] when its output says
    /// the port was taken.
    pub(crate) async fn spawn(
        spec: &LaunchSpec,
        policy: &dyn ServerTypePolicy,
        sink: LogSink,
        exit_tx: mpsc::UnboundedSender<SessionExit>,
        config: &Config,
    ) -> Result<Self> {
        let handle = match spec {
            LaunchSpec::Command(command) => {
                Self::spawn_command(command, policy, sink, exit_tx, config)?
            }
            LaunchSpec::StaticFiles { root, host, port } => {
                Self::spawn_listener(root, *host, *port, policy, sink, exit_tx, config)?
            }
        };

        if let Err(e) = handle.await_liveness(config).await {
            handle.terminate(Duration::ZERO).await;
            return Err(e);
        }

        Ok(handle)
    }

    fn spawn_command(
        spec: &CommandSpec,
        policy: &dyn ServerTypePolicy,
        sink: LogSink,
        exit_tx: mpsc::UnboundedSender<SessionExit>,
        config: &Config,
    ) -> Result<Self> {
        let mut command = std::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env);

        // Own process group so teardown reaches reloader children too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut command = Command::from(command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(session = %sink.session(), command = %spec.display(), "Spawning server process");

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::LaunchFailed(format!(
                "'{}' was not found; is it installed and on PATH?",
                spec.program
            )),
            _ => Error::LaunchFailed(format!("failed to run '{}': {}", spec.display(), e)),
        })?;

        let pid = Some(child.id());
        let early_output = Arc::new(Mutex::new(VecDeque::new()));
        let keep = config.early_output_lines;

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_reader(
                stdout,
                policy.classify_stream(StreamId::Stdout),
                sink.clone(),
                early_output.clone(),
                keep,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_reader(
                stderr,
                policy.classify_stream(StreamId::Stderr),
                sink.clone(),
                early_output.clone(),
                keep,
            )));
        }

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exit_state, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(watch_process(
            child,
            kill_rx,
            drains,
            sink.session(),
            exit_state,
            exit_tx,
        ));

        sink.manager(format!(
            "Started {} (pid {})",
            spec.display(),
            pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
        ));

        Ok(Self {
            session: sink.session(),
            server_type: policy.server_type(),
            host: spec.host,
            port: spec.port,
            control: Control::Process { pid, kill_tx },
            sink,
            exit_rx,
            monitor: Some(monitor),
            early_output,
            terminated: false,
        })
    }

    fn spawn_listener(
        root: &Path,
        host: IpAddr,
        port: u16,
        policy: &dyn ServerTypePolicy,
        sink: LogSink,
        exit_tx: mpsc::UnboundedSender<SessionExit>,
        config: &Config,
    ) -> Result<Self> {
        let (access_tx, access_rx) = mpsc::unbounded_channel();
        let bound = static_files::bind(root, host, port, config.static_workers, access_tx)?;

        let early_output = Arc::new(Mutex::new(VecDeque::new()));
        let drain = tokio::spawn(drain_channel(
            access_rx,
            policy.classify_stream(StreamId::Stderr),
            sink.clone(),
            early_output.clone(),
            config.early_output_lines,
        ));

        let (exit_state, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(watch_listener(
            bound.server,
            drain,
            sink.session(),
            exit_state,
            exit_tx,
        ));

        sink.manager(format!(
            "Serving {} on {}",
            root.display(),
            bound.local_addr
        ));

        Ok(Self {
            session: sink.session(),
            server_type: policy.server_type(),
            host,
            port,
            control: Control::Listener {
                handle: bound.handle,
            },
            sink,
            exit_rx,
            monitor: Some(monitor),
            early_output,
            terminated: false,
        })
    }

    async fn await_liveness(&self, config: &Config) -> Result<()> {
        sleep(config.liveness_delay()).await;
        self.fail_if_exited()?;

        let deadline = Instant::now() + config.ready_timeout();
        loop {
            if PortProbe::is_listening(self.host, self.port).await {
                return Ok(());
            }
            self.fail_if_exited()?;

            if Instant::now() >= deadline {
                tracing::warn!(session = %self.session, port = self.port, "Server is not accepting connections yet");
                self.sink.manager(format!(
                    "Server is running but not accepting connections on port {} yet",
                    self.port
                ));
                return Ok(());
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    fn fail_if_exited(&self) -> Result<()> {
        let exit = self.exit_rx.borrow().clone();
        let Some(exit) = exit else {
            return Ok(());
        };

        let output: Vec<String> = lock(&self.early_output).iter().cloned().collect();
        if output.iter().any(|line| reports_port_in_use(line)) {
            return Err(Error::PortInUse(self.port));
        }

        Err(Error::ImmediateExit {
            status: exit.description,
            output,
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// OS process id; `None` for the in-process static listener.
    pub fn pid(&self) -> Option<u32> {
        match &self.control {
            Control::Process { pid, .. } => *pid,
            Control::Listener { .. } => None,
        }
    }

    /// Whether the server has not exited yet.
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Stop the server: ask politely, wait up to `grace`, then kill.
    ///
    /// Also brings down whatever is left of the server's process group, even
    /// when the server itself had already exited. Always reclaims the
    /// background tasks before returning.
    pub async fn terminate(mut self, grace: Duration) -> Termination {
        self.terminated = true;
        let Some(mut monitor) = self.monitor.take() else {
            return Termination::AlreadyExited;
        };

        let termination = if self.is_alive() {
            self.stop_server(&mut monitor, grace).await
        } else {
            if timeout(FORCE_KILL_TIMEOUT, &mut monitor).await.is_err() {
                monitor.abort();
            }
            Termination::AlreadyExited
        };

        // Reloader children and background jobs outlive their leader
        if let Control::Process { pid: Some(pid), .. } = self.control {
            if sweep_group(pid, grace).await {
                tracing::warn!(session = %self.session, pid, "Killed leftover processes of the server");
                return Termination::Forced;
            }
        }
        termination
    }

    async fn stop_server(&self, monitor: &mut JoinHandle<()>, grace: Duration) -> Termination {
        self.request_stop();
        if timeout(grace, &mut *monitor).await.is_ok() {
            tracing::debug!(session = %self.session, "Server stopped gracefully");
            return Termination::Graceful;
        }

        tracing::warn!(session = %self.session, ?grace, "Server ignored stop request; killing it");
        self.request_kill();
        if timeout(FORCE_KILL_TIMEOUT, &mut *monitor).await.is_err() {
            tracing::error!(session = %self.session, "Server did not exit after kill");
            monitor.abort();
        }
        Termination::Forced
    }

    fn request_stop(&self) {
        match &self.control {
            #[cfg(unix)]
            Control::Process { pid: Some(pid), .. } => {
                signal_group(*pid, nix::sys::signal::Signal::SIGTERM);
            }
            // No polite stop available
            Control::Process { kill_tx, .. } => {
                let _ = kill_tx.send(());
            }
            Control::Listener { handle } => {
                // The command is sent before the future is polled
                drop(handle.stop(true));
            }
        }
    }

    fn request_kill(&self) {
        match &self.control {
            Control::Process { pid, kill_tx } => {
                kill_group(*pid);
                let _ = kill_tx.send(());
            }
            Control::Listener { handle } => {
                drop(handle.stop(false));
            }
        }
    }
}

impl Drop for ServerProcessHandle {
    fn drop(&mut self) {
        if !self.terminated && self.is_alive() {
            tracing::warn!(session = %self.session, "Server handle dropped while running; killing server");
            self.request_kill();
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // ESRCH only means the group is already gone
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        tracing::debug!(pid, ?signal, error = %e, "Failed to signal process group");
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
}

// The monitor's kill request covers the single process
#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Whether any process of the group led by `pid` still exists.
#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(pid) => killpg(Pid::from_raw(pid), None).is_ok(),
        Err(_) => false,
    }
}

/// Terminate what is left of the group once its leader is gone: SIGTERM,
/// up to `grace` to exit, then SIGKILL. Returns whether SIGKILL was needed.
#[cfg(unix)]
async fn sweep_group(pid: u32, grace: Duration) -> bool {
    if !group_alive(pid) {
        return false;
    }

    tracing::debug!(pid, "Process group outlived its leader");
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        sleep(GROUP_POLL_INTERVAL).await;
        if !group_alive(pid) {
            return false;
        }
    }

    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    true
}

#[cfg(not(unix))]
async fn sweep_group(_pid: u32, _grace: Duration) -> bool {
    false
}

/// Whether a line of server output says the port was already taken.
pub(crate) fn reports_port_in_use(line: &str) -> bool {
    const PATTERNS: [&str; 4] = [
        "address already in use",
        "port is already in use",
        "is in use by another program",
        "only one usage of each socket address",
    ];
    let line = line.to_ascii_lowercase();
    PATTERNS.iter().any(|pattern| line.contains(pattern))
}

fn remember(early_output: &Mutex<VecDeque<String>>, keep: usize, line: &str) {
    let mut lines = lock(early_output);
    if lines.len() < keep {
        lines.push_back(line.to_string());
    }
}

async fn drain_reader<R>(
    reader: R,
    tag: LogTag,
    sink: LogSink,
    early_output: Arc<Mutex<VecDeque<String>>>,
    keep: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    continue;
                }
                remember(&early_output, keep, line);
                sink.emit(tag, line);
            }
            Err(e) => {
                tracing::warn!(session = %sink.session(), %tag, error = %e, "Output relay stopped");
                break;
            }
        }
    }
}

async fn drain_channel(
    mut lines: mpsc::UnboundedReceiver<String>,
    tag: LogTag,
    sink: LogSink,
    early_output: Arc<Mutex<VecDeque<String>>>,
    keep: usize,
) {
    while let Some(line) = lines.recv().await {
        remember(&early_output, keep, &line);
        sink.emit(tag, line);
    }
}

async fn join_drains(drains: Vec<JoinHandle<()>>, limit: Duration) {
    for mut drain in drains {
        if timeout(limit, &mut drain).await.is_err() {
            drain.abort();
        }
    }
}

fn publish_exit(
    session: SessionId,
    exit: ExitInfo,
    exit_state: watch::Sender<Option<ExitInfo>>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
) {
    tracing::info!(%session, status = %exit.description, "Server exited");
    exit_state.send_replace(Some(exit.clone()));
    let _ = exit_tx.send(SessionExit { session, exit });
}

async fn watch_process(
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    drains: Vec<JoinHandle<()>>,
    session: SessionId,
    exit_state: watch::Sender<Option<ExitInfo>>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
) {
    let status = loop {
        tokio::select! {
            status = child.status() => break status,
            Some(()) = kill_rx.recv() => {
                if let Err(e) = child.kill() {
                    tracing::debug!(%session, error = %e, "Kill failed");
                }
            }
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => ExitInfo {
            code: None,
            description: format!("unknown exit status ({})", e),
        },
    };

    // Relay whatever the process wrote before dying
    join_drains(drains, PROCESS_DRAIN_TIMEOUT).await;
    publish_exit(session, exit, exit_state, exit_tx);
}

async fn watch_listener(
    server: Server,
    drain: JoinHandle<()>,
    session: SessionId,
    exit_state: watch::Sender<Option<ExitInfo>>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
) {
    let exit = match server.await {
        Ok(()) => ExitInfo {
            code: Some(0),
            description: "listener closed".to_string(),
        },
        Err(e) => ExitInfo {
            code: None,
            description: format!("listener failed: {}", e),
        },
    };

    join_drains(vec![drain], LISTENER_DRAIN_TIMEOUT).await;
    publish_exit(session, exit, exit_state, exit_tx);
}
