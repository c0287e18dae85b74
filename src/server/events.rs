use crate::error::{Error, ErrorKind};
use crate::server::types::{LogTag, ServerStatus, ServerType, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Notifications buffered for a receiver that is not reading.
pub const NOTIFICATION_BUFFER: usize = 1024;

/// Notification delivered to the front end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notification {
    /// A line of server or manager output
    LogLine {
        session: Option<SessionId>,
        tag: LogTag,
        text: String,
    },
    /// The slot changed state; `addresses` is set when it became `Running`
    StateChanged {
        status: ServerStatus,
        addresses: Option<Vec<String>>,
    },
    /// A start or stop call failed
    Error { kind: ErrorKind, message: String },
    /// The server exited without being asked to
    Terminated {
        session: SessionId,
        exit: Option<String>,
    },
}

/// Receiving end of the notification channel.
///
/// The channel holds at most [`NOTIFICATION_BUFFER`] notifications. While it
/// is full, new notifications are dropped; the log and event histories still
/// keep them.
pub type NotificationReceiver = mpsc::Receiver<Notification>;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerLifecycleEvent {
    /// Server started
    Started,
    /// Server stopped on request
    Stopped,
    /// Server failed to start
    Failed,
    /// Server exited on its own
    Terminated,
}

/// Server lifecycle record
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub session: SessionId,
    pub server_type: ServerType,
    pub event: ServerLifecycleEvent,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

/// A retained log line
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub session: Option<SessionId>,
    pub tag: LogTag,
    pub text: String,
}

/// Fan-in point for everything observers see: the notification channel plus
/// bounded log and lifecycle histories.
pub(crate) struct EventBus {
    tx: mpsc::Sender<Notification>,
    lagging: AtomicBool,
    logs: Mutex<VecDeque<LogEntry>>,
    records: Mutex<VecDeque<ServerEvent>>,
    log_limit: usize,
    record_limit: usize,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventBus {
    pub(crate) fn new(
        log_limit: usize,
        record_limit: usize,
        buffer: usize,
    ) -> (Arc<Self>, NotificationReceiver) {
        let (tx, rx) = mpsc::channel(buffer);
        let bus = Self {
            tx,
            lagging: AtomicBool::new(false),
            logs: Mutex::new(VecDeque::new()),
            records: Mutex::new(VecDeque::new()),
            log_limit,
            record_limit,
        };
        (Arc::new(bus), rx)
    }

    fn send(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {
                if self.lagging.swap(false, Ordering::Relaxed) {
                    tracing::info!("Notification receiver caught up");
                }
            }
            Err(TrySendError::Full(_)) => {
                if !self.lagging.swap(true, Ordering::Relaxed) {
                    tracing::warn!("Notification receiver is not reading; dropping notifications");
                }
            }
            // A dropped receiver only means nobody is watching
            Err(TrySendError::Closed(_)) => tracing::trace!("Notification receiver dropped"),
        }
    }

    pub(crate) fn log(&self, session: Option<SessionId>, tag: LogTag, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(session = ?session, %tag, "{}", text);

        {
            let mut logs = lock(&self.logs);
            logs.push_back(LogEntry {
                timestamp: Utc::now(),
                session,
                tag,
                text: text.clone(),
            });
            while logs.len() > self.log_limit {
                logs.pop_front();
            }
        }

        self.send(Notification::LogLine { session, tag, text });
    }

    pub(crate) fn state_changed(&self, status: ServerStatus, addresses: Option<Vec<String>>) {
        tracing::debug!(%status, "State changed");
        self.send(Notification::StateChanged { status, addresses });
    }

    pub(crate) fn error(&self, error: &Error) {
        self.send(Notification::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub(crate) fn terminated(&self, session: SessionId, exit: Option<String>) {
        self.send(Notification::Terminated { session, exit });
    }

    pub(crate) fn record(
        &self,
        session: SessionId,
        server_type: ServerType,
        event: ServerLifecycleEvent,
        details: Option<String>,
    ) {
        let mut records = lock(&self.records);
        records.push_back(ServerEvent {
            session,
            server_type,
            event,
            timestamp: Utc::now(),
            details,
        });
        while records.len() > self.record_limit {
            records.pop_front();
        }
    }

    /// Newest first
    pub(crate) fn records(&self, limit: Option<usize>) -> Vec<ServerEvent> {
        let records = lock(&self.records);
        let limit = limit.unwrap_or(records.len());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn clear_records(&self) {
        lock(&self.records).clear();
    }

    /// Oldest first, at most `limit` of the most recent lines
    pub(crate) fn recent_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let logs = lock(&self.logs);
        let skip = limit.map_or(0, |limit| logs.len().saturating_sub(limit));
        logs.iter().skip(skip).cloned().collect()
    }
}

/// Where a session's output goes. Bound to the session it was created for,
/// so every line stays attributable after the slot moves on.
#[derive(Clone)]
pub(crate) struct LogSink {
    session: SessionId,
    bus: Arc<EventBus>,
}

impl LogSink {
    pub(crate) fn new(session: SessionId, bus: Arc<EventBus>) -> Self {
        Self { session, bus }
    }

    pub(crate) fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn emit(&self, tag: LogTag, text: impl Into<String>) {
        self.bus.log(Some(self.session), tag, text);
    }

    pub(crate) fn manager(&self, text: impl Into<String>) {
        self.emit(LogTag::MANAGER, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_history_is_bounded() {
        let (bus, mut rx) = EventBus::new(3, 3, 16);
        for i in 0..5 {
            bus.log(None, LogTag::MANAGER, format!("line {}", i));
        }

        let logs = bus.recent_logs(None);
        let texts: Vec<_> = logs.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);

        let last_two: Vec<_> = bus
            .recent_logs(Some(2))
            .into_iter()
            .map(|l| l.text)
            .collect();
        assert_eq!(last_two, vec!["line 3", "line 4"]);

        // Every line was also delivered
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 5);
    }

    #[test]
    fn test_records_newest_first() {
        let (bus, _rx) = EventBus::new(10, 10, 16);
        let session = SessionId::new();
        bus.record(session, ServerType::Php, ServerLifecycleEvent::Started, None);
        bus.record(session, ServerType::Php, ServerLifecycleEvent::Stopped, None);

        let records = bus.records(None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, ServerLifecycleEvent::Stopped);
        assert_eq!(records[1].event, ServerLifecycleEvent::Started);

        assert_eq!(bus.records(Some(1)).len(), 1);

        bus.clear_records();
        assert!(bus.records(None).is_empty());
    }

    #[test]
    fn test_send_survives_dropped_receiver() {
        let (bus, rx) = EventBus::new(10, 10, 16);
        drop(rx);
        bus.state_changed(ServerStatus::Idle, None);
        bus.log(None, LogTag::MANAGER, "still recorded");
        assert_eq!(bus.recent_logs(None).len(), 1);
    }

    #[test]
    fn test_full_channel_drops_notifications_but_keeps_history() {
        let (bus, mut rx) = EventBus::new(100, 10, 4);
        for i in 0..10 {
            bus.log(None, LogTag::MANAGER, format!("line {}", i));
        }
        assert_eq!(bus.recent_logs(None).len(), 10);

        let mut delivered = Vec::new();
        while let Ok(Notification::LogLine { text, .. }) = rx.try_recv() {
            delivered.push(text);
        }
        assert_eq!(delivered, vec!["line 0", "line 1", "line 2", "line 3"]);

        // Room again once the receiver has read
        bus.state_changed(ServerStatus::Idle, None);
        assert!(matches!(
            rx.try_recv(),
            Ok(Notification::StateChanged {
                status: ServerStatus::Idle,
                ..
            })
        ));
    }
}
