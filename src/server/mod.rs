/// Server management module for devserve.
///
/// This module launches, watches and tears down the one development server a
/// [`LifecycleManager`] owns. Public operations are instrumented with
/// `tracing` spans.
///
/// # Components
///
/// * `lifecycle` - The state machine owning the server slot
/// * `process` - One launched server and its output relay
/// * `policy` - Per server-type entry points, commands and log tags
/// * `probe` - Port availability checks
/// * `address` - Reachable URL computation
/// * `events` - Notifications and in-memory histories
///
/// # Examples
///
/// Serving a folder and watching notifications:
///
/// ```no_run
/// use devserve::config::Config;
/// use devserve::server::{LaunchRequest, LifecycleManager, Notification, ServerType};
///
/// # async fn run() -> devserve::Result<()> {
/// let (manager, mut notifications) = LifecycleManager::new(Config::default())?;
/// manager
///     .start(LaunchRequest::new("./site", 8000, ServerType::StaticFiles))
///     .await?;
///
/// while let Some(notification) = notifications.recv().await {
///     if let Notification::LogLine { tag, text, .. } = notification {
///         println!("{} {}", tag, text);
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// Choosing a policy directly:
///
/// ```
/// use devserve::server::{ServerType, policy_for};
///
/// let policy = policy_for(ServerType::Django);
/// assert_eq!(policy.server_type(), ServerType::Django);
/// ```
pub mod address;
pub mod events;
pub mod lifecycle;
pub mod policy;
pub mod probe;
pub mod process;
mod static_files;
pub mod types;

pub use address::{AddressResolver, LanAddressSource, Resolution, RouteProbeSource};
pub use events::{
    LogEntry, NOTIFICATION_BUFFER, Notification, NotificationReceiver, ServerEvent,
    ServerLifecycleEvent,
};
pub use lifecycle::{LifecycleManager, ServerSession};
pub use policy::{ServerTypePolicy, policy_for};
pub use probe::PortProbe;
pub use process::{ExitInfo, ServerProcessHandle, Termination};
pub use types::{
    CommandSpec, LaunchRequest, LaunchSpec, LogSource, LogTag, ServerStatus, ServerType,
    SessionId, StreamId,
};
