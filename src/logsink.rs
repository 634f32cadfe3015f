//! Centralized run logging for concurrent workers.
//!
//! Many producers post immutable [`LogEvent`] values into a bounded channel;
//! a single consumer owns the sink and performs all I/O, appending one line
//! per event to the run log and mirroring it to the console. That gives
//! byte-level line integrity without locks: events are never interleaved
//! mid-line, and per-producer arrival order is preserved. No total order
//! across producers is promised.
//!
//! Lifecycle: the consumer starts before any worker is spawned and is
//! drained only after every worker has terminated, so trailing events are
//! never lost.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the event channel.
const CHANNEL_CAPACITY: usize = 1024;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One log event. Ownership transfers into the channel on post and the
/// single consumer reads it exactly once.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Severity prefix written to the log store.
    pub severity: Severity,
    /// Producer identity (e.g. "main", "render-3", "train").
    pub source: String,
    /// Message text.
    pub message: String,
}

impl LogEvent {
    fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            source: source.into(),
            message: message.into(),
        }
    }

    /// Formats the event as a single log line (without trailing newline).
    fn format_line(&self) -> String {
        format!(
            "{} - {} - [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.severity,
            self.source,
            self.message
        )
    }
}

/// Cheaply cloneable handle for posting events to the aggregator.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: mpsc::Sender<LogEvent>,
}

impl LogSender {
    /// Posts an event, waiting only on channel backpressure, never on I/O.
    async fn post(&self, event: LogEvent) {
        // A closed channel means the consumer is gone; nothing useful left
        // to do with the event but drop it.
        let _ = self.tx.send(event).await;
    }

    /// Posts a debug event.
    pub async fn debug(&self, source: &str, message: impl Into<String>) {
        self.post(LogEvent::new(Severity::Debug, source, message)).await;
    }

    /// Posts an info event.
    pub async fn info(&self, source: &str, message: impl Into<String>) {
        self.post(LogEvent::new(Severity::Info, source, message)).await;
    }

    /// Posts a warning event.
    pub async fn warn(&self, source: &str, message: impl Into<String>) {
        self.post(LogEvent::new(Severity::Warn, source, message)).await;
    }

    /// Posts an error event.
    pub async fn error(&self, source: &str, message: impl Into<String>) {
        self.post(LogEvent::new(Severity::Error, source, message)).await;
    }
}

/// Single-writer log sink fed by a bounded channel.
pub struct LogAggregator {
    path: PathBuf,
    handle: JoinHandle<std::io::Result<()>>,
}

impl LogAggregator {
    /// Starts the consumer task and returns the sender handle.
    ///
    /// Must be called before any worker is spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened for append.
    pub async fn spawn(path: impl AsRef<Path>) -> std::io::Result<(LogSender, Self)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<LogEvent>(CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // One write per event keeps lines whole in the backing store
                let mut line = event.format_line();
                line.push('\n');
                file.write_all(line.as_bytes()).await?;

                // Console mirror through the process-level subscriber
                match event.severity {
                    Severity::Debug => debug!(source = %event.source, "{}", event.message),
                    Severity::Info => info!(source = %event.source, "{}", event.message),
                    Severity::Warn => warn!(source = %event.source, "{}", event.message),
                    Severity::Error => error!(source = %event.source, "{}", event.message),
                }
            }
            file.flush().await?;
            Ok(())
        });

        Ok((LogSender { tx }, Self { path, handle }))
    }

    /// Path of the backing log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the final sender and waits for the consumer to drain the queue.
    ///
    /// Every worker holding a `LogSender` clone must have terminated first,
    /// otherwise trailing events would still be in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer failed to write the log file.
    pub async fn shutdown(self, sender: LogSender) -> std::io::Result<()> {
        drop(sender);
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(format!(
                "log consumer task failed: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_events_reach_backing_store() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("run.log");

        let (sender, aggregator) = LogAggregator::spawn(&log_path).await.unwrap();
        sender.info("main", "pipeline started").await;
        sender.error("render-0", "text2image failed").await;
        aggregator.shutdown(sender).await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("[main] pipeline started"));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[1].contains("[render-0] text2image failed"));
    }

    #[tokio::test]
    async fn test_concurrent_producers_no_corrupted_lines() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("run.log");

        let (sender, aggregator) = LogAggregator::spawn(&log_path).await.unwrap();

        let producers = 8;
        let per_producer = 50;
        let mut handles = Vec::new();
        for p in 0..producers {
            let sender = sender.clone();
            handles.push(tokio::spawn(async move {
                let source = format!("worker-{}", p);
                for i in 0..per_producer {
                    sender.info(&source, format!("event {}", i)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        aggregator.shutdown(sender).await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), producers * per_producer);

        // Every line is whole and well-formed
        for line in &lines {
            assert!(line.contains(" - INFO - [worker-"), "corrupt line: {}", line);
        }

        // Per-producer arrival order is preserved
        for p in 0..producers {
            let marker = format!("[worker-{}]", p);
            let sequence: Vec<usize> = lines
                .iter()
                .filter(|l| l.contains(&marker))
                .map(|l| {
                    l.rsplit("event ")
                        .next()
                        .unwrap()
                        .parse::<usize>()
                        .unwrap()
                })
                .collect();
            assert_eq!(sequence, (0..per_producer).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_events() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("run.log");

        let (sender, aggregator) = LogAggregator::spawn(&log_path).await.unwrap();
        for i in 0..200 {
            sender.debug("main", format!("trailing {}", i)).await;
        }
        aggregator.shutdown(sender).await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 200);
        assert!(content.lines().last().unwrap().contains("trailing 199"));
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Debug.to_string(), "DEBUG");
        assert_eq!(Severity::Info.to_string(), "INFO");
        assert_eq!(Severity::Warn.to_string(), "WARN");
        assert_eq!(Severity::Error.to_string(), "ERROR");
    }
}
