use crate::config::{Config, validate_config};
use crate::error::{Error, Result};
use crate::server::address::AddressResolver;
use crate::server::events::{
    EventBus, LogEntry, LogSink, NOTIFICATION_BUFFER, NotificationReceiver, ServerEvent,
    ServerLifecycleEvent, lock,
};
use crate::server::policy::policy_for;
use crate::server::probe::PortProbe;
use crate::server::process::{ServerProcessHandle, SessionExit, Termination};
use crate::server::types::{LaunchRequest, LogTag, ServerStatus, ServerType, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Snapshot of the manager's server slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSession {
    pub status: ServerStatus,
    /// Session occupying the slot; `None` while idle
    pub session: Option<SessionId>,
    pub server_type: Option<ServerType>,
    pub folder: Option<PathBuf>,
    pub port: Option<u16>,
    /// OS process id of an external server
    pub pid: Option<u32>,
    /// Reachable URLs, loopback first; empty unless running
    pub addresses: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Message of the last failed start, cleared by the next successful one
    pub last_error: Option<String>,
}

impl ServerSession {
    fn idle(last_error: Option<String>) -> Self {
        Self {
            status: ServerStatus::Idle,
            session: None,
            server_type: None,
            folder: None,
            port: None,
            pid: None,
            addresses: Vec::new(),
            started_at: None,
            last_error,
        }
    }
}

struct Slot {
    info: ServerSession,
    handle: Option<ServerProcessHandle>,
    host: Option<IpAddr>,
}

struct Inner {
    config: Config,
    resolver: AddressResolver,
    // Held for the whole of a start, stop or exit transition
    op_lock: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
    bus: Arc<EventBus>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
}

/// Owner of the single server slot.
///
/// `start` and `stop` are serialized by an operation lock; a call made while
/// another one is in flight fails with [`Error::OperationInProgress`]. Every
/// call ends with exactly one terminal notification on the channel returned
/// by [`LifecycleManager::new`]: `StateChanged(Running)` after a successful
/// start, `StateChanged(Idle)` after a successful stop, `Error` otherwise.
///
/// # Examples
///
/// ```no_run
/// use devserve::config::Config;
/// use devserve::server::{LaunchRequest, LifecycleManager, ServerType};
///
/// # async fn run() -> devserve::Result<()> {
/// let (manager, mut notifications) = LifecycleManager::new(Config::default())?;
///
/// let request = LaunchRequest::new("/path/to/site", 8010, ServerType::StaticFiles);
/// let session = manager.start(request).await?;
/// println!("Serving at {:?}", session.addresses);
///
/// while let Ok(notification) = notifications.try_recv() {
///     println!("{:?}", notification);
/// }
///
/// manager.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    /// Create a manager and the receiving end of its notification channel.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, which hosts the task
    /// watching for servers that exit on their own.
    pub fn new(config: Config) -> Result<(Self, NotificationReceiver)> {
        Self::with_address_resolver(config, AddressResolver::new())
    }

    /// Like [`LifecycleManager::new`] with a custom address resolver.
    pub fn with_address_resolver(
        config: Config,
        resolver: AddressResolver,
    ) -> Result<(Self, NotificationReceiver)> {
        validate_config(&config)?;

        let loopback = config
            .bind_host
            .parse::<IpAddr>()
            .is_ok_and(|host| host.is_loopback());
        let resolver = if loopback {
            resolver.loopback_only()
        } else {
            resolver
        };

        let (bus, notifications) = EventBus::new(config.log_history, config.event_history, NOTIFICATION_BUFFER);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            resolver,
            op_lock: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                info: ServerSession::idle(None),
                handle: None,
                host: None,
            }),
            bus,
            exit_tx,
        });

        tokio::spawn(supervise(Arc::downgrade(&inner), exit_rx));
        tracing::debug!("Lifecycle manager created");

        Ok((Self { inner }, notifications))
    }

    /// Start a server for `request`, replacing the current one if any.
    ///
    /// Returns the slot snapshot once the server is running.
    #[tracing::instrument(skip(self, request), fields(
        folder = %request.folder().display(),
        port = request.port(),
        server_type = ?request.server_type(),
    ))]
    pub async fn start(&self, request: LaunchRequest) -> Result<ServerSession> {
        let Ok(_guard) = self.inner.op_lock.try_lock() else {
            tracing::warn!("Start rejected: another operation is in progress");
            let error = Error::OperationInProgress;
            self.inner.bus.error(&error);
            return Err(error);
        };

        self.inner.start_locked(request).await
    }

    /// Stop the current server.
    ///
    /// Fails with [`Error::NotRunning`] when the slot is idle, without
    /// changing anything. Otherwise always succeeds, escalating to a forced
    /// kill if the server ignores the graceful request.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let result = match self.inner.op_lock.try_lock() {
            Ok(_guard) => self.inner.stop_locked().await,
            Err(_) => Err(Error::OperationInProgress),
        };

        if let Err(e) = &result {
            tracing::info!(error = %e, "Stop rejected");
            self.inner.bus.error(e);
        }
        result
    }

    /// Wait for any in-flight operation, then stop the server if one runs.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let _guard = self.inner.op_lock.lock().await;
        if self.inner.stop_locked().await.is_err() {
            tracing::debug!("Nothing to shut down");
        }
    }

    /// Snapshot of the server slot.
    pub fn current_status(&self) -> ServerSession {
        lock(&self.inner.slot).info.clone()
    }

    /// Retained log lines, oldest first; at most `limit` of the newest.
    pub fn recent_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        self.inner.bus.recent_logs(limit)
    }

    /// Lifecycle records, newest first.
    pub fn events(&self, limit: Option<usize>) -> Vec<ServerEvent> {
        self.inner.bus.records(limit)
    }

    pub fn clear_events(&self) {
        self.inner.bus.clear_records();
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn status(&self) -> ServerStatus {
        lock(&self.slot).info.status
    }

    async fn start_locked(&self, request: LaunchRequest) -> Result<ServerSession> {
        if matches!(self.status(), ServerStatus::Running | ServerStatus::Starting) {
            self.bus.log(
                None,
                LogTag::MANAGER,
                "Stopping the current server before starting a new one",
            );
            // Only fails when nothing runs
            let _ = self.stop_locked().await;
        }

        let session = SessionId::new();
        {
            let mut slot = lock(&self.slot);
            slot.info = ServerSession {
                status: ServerStatus::Starting,
                session: Some(session),
                server_type: Some(request.server_type()),
                folder: Some(request.folder().to_path_buf()),
                port: Some(request.port()),
                ..ServerSession::idle(None)
            };
        }
        self.bus.state_changed(ServerStatus::Starting, None);

        let sink = LogSink::new(session, self.bus.clone());
        match self.launch(&request, &sink).await {
            Ok((handle, host, addresses)) => {
                sink.manager(format!("Server running at {}", addresses.join(", ")));
                self.bus.record(
                    session,
                    request.server_type(),
                    ServerLifecycleEvent::Started,
                    Some(addresses.join(", ")),
                );
                tracing::info!(%session, addresses = ?addresses, "Server running");

                let snapshot = {
                    let mut slot = lock(&self.slot);
                    slot.info.status = ServerStatus::Running;
                    slot.info.pid = handle.pid();
                    slot.info.addresses = addresses.clone();
                    slot.info.started_at = Some(Utc::now());
                    slot.handle = Some(handle);
                    slot.host = Some(host);
                    slot.info.clone()
                };
                self.bus.state_changed(ServerStatus::Running, Some(addresses));
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(%session, error = %e, "Start failed");
                sink.manager(format!("Failed to start server: {}", e));
                self.bus.record(
                    session,
                    request.server_type(),
                    ServerLifecycleEvent::Failed,
                    Some(e.to_string()),
                );

                {
                    let mut slot = lock(&self.slot);
                    slot.info.status = ServerStatus::Failed;
                    slot.info.last_error = Some(e.to_string());
                }
                self.bus.state_changed(ServerStatus::Failed, None);

                {
                    let mut slot = lock(&self.slot);
                    let last_error = slot.info.last_error.take();
                    slot.info = ServerSession::idle(last_error);
                }
                self.bus.state_changed(ServerStatus::Idle, None);
                self.bus.error(&e);
                Err(e)
            }
        }
    }

    /// Validation, probe and spawn. Nothing is left running on error.
    async fn launch(
        &self,
        request: &LaunchRequest,
        sink: &LogSink,
    ) -> Result<(ServerProcessHandle, IpAddr, Vec<String>)> {
        request.validate()?;

        let policy = policy_for(request.server_type());
        policy.validate(request.folder())?;

        let port = request.port();
        if !PortProbe::is_available(port) {
            return Err(Error::PortInUse(port));
        }

        let spec = policy.build_launch(request.folder(), port, &self.config);
        sink.manager(format!(
            "Starting {} for {} on port {}",
            request.server_type(),
            request.folder().display(),
            port
        ));

        let handle = ServerProcessHandle::spawn(
            &spec,
            policy,
            sink.clone(),
            self.exit_tx.clone(),
            &self.config,
        )
        .await?;

        let resolution = self.resolver.resolve(port);
        if let Some(diagnostic) = resolution.diagnostic {
            sink.manager(diagnostic);
        }

        Ok((handle, spec.host(), resolution.urls))
    }

    async fn stop_locked(&self) -> Result<()> {
        let (handle, host) = {
            let mut slot = lock(&self.slot);
            if matches!(slot.info.status, ServerStatus::Idle | ServerStatus::Failed) {
                return Err(Error::NotRunning);
            }
            let Some(handle) = slot.handle.take() else {
                return Err(Error::NotRunning);
            };
            slot.info.status = ServerStatus::Stopping;
            (handle, slot.host.take())
        };
        self.bus.state_changed(ServerStatus::Stopping, None);

        let session = handle.session();
        let server_type = handle.server_type();
        let port = handle.port();
        let sink = LogSink::new(session, self.bus.clone());
        sink.manager("Stopping server");

        let grace = self.config.grace_period();
        match handle.terminate(grace).await {
            Termination::Graceful => tracing::debug!(%session, "Server stopped"),
            Termination::AlreadyExited => tracing::debug!(%session, "Server had already exited"),
            Termination::Forced => {
                let timeout = Error::TerminationTimeout(grace);
                tracing::warn!(%session, "{}", timeout);
                sink.manager(timeout.to_string());
            }
        }

        self.await_port_release(&sink, host, port).await;

        sink.manager("Server stopped");
        self.bus
            .record(session, server_type, ServerLifecycleEvent::Stopped, None);

        {
            let mut slot = lock(&self.slot);
            let last_error = slot.info.last_error.take();
            slot.info = ServerSession::idle(last_error);
        }
        self.bus.state_changed(ServerStatus::Idle, None);
        Ok(())
    }

    /// Handle a server exit. Only the exit of the running session counts;
    /// exits caused by stop, replacement or a failed start are stale here.
    async fn handle_exit(&self, exit: SessionExit) {
        let _guard = self.op_lock.lock().await;

        let (handle, host) = {
            let mut slot = lock(&self.slot);
            let current = slot.handle.as_ref().map(|handle| handle.session());
            if slot.info.status != ServerStatus::Running || current != Some(exit.session) {
                tracing::debug!(session = %exit.session, "Ignoring exit of superseded session");
                return;
            }
            match slot.handle.take() {
                Some(handle) => (handle, slot.host.take()),
                None => return,
            }
        };

        let session = handle.session();
        let server_type = handle.server_type();
        let port = handle.port();
        let sink = LogSink::new(session, self.bus.clone());

        tracing::warn!(%session, status = %exit.exit.description, "Server terminated unexpectedly");
        sink.manager(format!(
            "Server terminated unexpectedly ({})",
            exit.exit.description
        ));

        handle.terminate(self.config.grace_period()).await;
        self.await_port_release(&sink, host, port).await;

        self.bus.record(
            session,
            server_type,
            ServerLifecycleEvent::Terminated,
            Some(exit.exit.description.clone()),
        );
        {
            let mut slot = lock(&self.slot);
            slot.info = ServerSession::idle(None);
        }
        self.bus.terminated(session, Some(exit.exit.description));
        self.bus.state_changed(ServerStatus::Idle, None);
    }

    async fn await_port_release(&self, sink: &LogSink, host: Option<IpAddr>, port: u16) {
        let host = host.unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        if !PortProbe::wait_until_released(host, port, self.config.release_timeout()).await {
            tracing::warn!(port, "Port still bound after teardown");
            sink.manager(format!("Port {} is still held by another process", port));
        }
    }
}

async fn supervise(inner: Weak<Inner>, mut exits: mpsc::UnboundedReceiver<SessionExit>) {
    while let Some(exit) = exits.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_exit(exit).await;
    }
    tracing::debug!("Exit supervisor finished");
}
