//! Event surface shared by the crawler and the download pipeline.
//!
//! UI consumers subscribe to a broadcast stream; emitters never block and
//! never fail when nobody is listening. Commands travel the other way
//! through [`crate::crawler::CrawlHandle`] and pipeline methods - the two
//! subsystems themselves communicate only through the store.

use tokio::sync::broadcast;

use crate::store::{Asset, StoreStats};

/// Default buffered events per subscriber before lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Severity attached to log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Operation lost.
    Error,
}

impl LogLevel {
    /// Short uppercase label for UI log panes.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Orchestrator lifecycle state reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    /// Actively fetching pages.
    Running,
    /// Paused at a cooperative checkpoint.
    Paused,
    /// No crawl in progress.
    Idle,
    /// Blocked on a bot-detection challenge.
    Challenge,
}

/// One event on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// Free-form log line.
    Log {
        /// Message text.
        message: String,
        /// Severity.
        level: LogLevel,
    },
    /// Store counters after a unit of work.
    Stats(StoreStats),
    /// A new or enriched asset with a resolved stream.
    AssetDiscovered(Box<Asset>),
    /// Orchestrator state change.
    Status(CrawlStatus),
    /// Download progress for one asset.
    DownloadProgress {
        /// Asset being downloaded.
        asset_id: String,
        /// 0-100.
        percent: u8,
        /// Human-readable progress line (speed, ETA).
        status_text: String,
    },
    /// Terminal download outcome for one asset.
    DownloadComplete {
        /// Asset the job belonged to.
        asset_id: String,
        /// True when the file landed on disk.
        success: bool,
        /// Saved path on success, failure reason otherwise.
        path_or_reason: String,
    },
}

/// Broadcast bus carrying [`Event`]s to any number of subscribers.
///
/// Cheap to clone; all clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Opens a new subscription starting at the current position.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emits an event. A bus with no subscribers drops it silently.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Emits a log event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log {
            message: message.into(),
            level,
        });
    }

    /// Emits a status change.
    pub fn status(&self, status: CrawlStatus) {
        self.emit(Event::Status(status));
    }

    /// Emits a stats snapshot.
    pub fn stats(&self, stats: StoreStats) {
        self.emit(Event::Stats(stats));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.log(LogLevel::Info, "crawl started");
        bus.status(CrawlStatus::Running);

        match rx.recv().await.unwrap() {
            Event::Log { message, level } => {
                assert_eq!(message, "crawl started");
                assert_eq!(level, LogLevel::Info);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Status(CrawlStatus::Running)
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.log(LogLevel::Warn, "nobody listening");
        // No panic, no error
    }

    #[tokio::test]
    async fn test_two_subscribers_both_receive() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.status(CrawlStatus::Challenge);

        assert!(matches!(a.recv().await.unwrap(), Event::Status(CrawlStatus::Challenge)));
        assert!(matches!(b.recv().await.unwrap(), Event::Status(CrawlStatus::Challenge)));
    }

    #[test]
    fn test_log_level_labels() {
        assert_eq!(LogLevel::Debug.label(), "DEBUG");
        assert_eq!(LogLevel::Error.label(), "ERROR");
    }
}
