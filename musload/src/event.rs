//! Status events streamed from a running session to its caller.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Outcome;

/// Severity tag of a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[non_exhaustive]
pub enum Level {
    /// Normal protocol progress.
    Info,
    /// A failure, or a data-byte echo mismatch tolerated by the echo policy.
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        })
    }
}

/// Human-readable line describing one protocol step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct StatusEvent {
    /// Severity.
    pub level: Level,
    /// Message text.
    pub message: String,
    /// Time since the session started.
    pub elapsed: Duration,
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Item of a session's event stream.
///
/// A stream holds zero or more [`Status`](Self::Status) and
/// [`Progress`](Self::Progress) items followed by exactly one
/// [`Finished`](Self::Finished).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A status line.
    Status(StatusEvent),
    /// Image bytes accepted so far.
    Progress {
        /// Bytes accepted by the transport.
        sent: usize,
        /// Image length.
        total: usize,
    },
    /// Terminal result; always the last event.
    Finished {
        /// Session outcome.
        outcome: Outcome,
    },
}

impl SessionEvent {
    /// Returns `true` for the terminal event.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Sending half of a session's event stream.
///
/// Mirrors every status line to `tracing`. A dropped receiver is not an
/// error: the session keeps running to a terminal state regardless.
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    /// Event channel to the caller.
    tx: UnboundedSender<SessionEvent>,
    /// Session start.
    t0: Instant,
}

impl Reporter {
    /// Creates a reporter whose clock starts now.
    pub(crate) fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            tx,
            t0: Instant::now(),
        }
    }

    /// Time since the session started.
    pub(crate) fn elapsed(&self) -> Duration {
        self.t0.elapsed()
    }

    /// Emits an `INFO` line.
    pub(crate) fn info(&self, message: impl Into<String>) {
        self.status(Level::Info, message.into());
    }

    /// Emits an `ERROR` line.
    pub(crate) fn error(&self, message: impl Into<String>) {
        self.status(Level::Error, message.into());
    }

    /// Emits a progress update.
    pub(crate) fn progress(&self, sent: usize, total: usize) {
        tracing::trace!(sent, total, "progress");
        let _ = self.tx.send(SessionEvent::Progress { sent, total });
    }

    /// Emits the terminal event.
    pub(crate) fn finish(&self, outcome: Outcome) {
        let _ = self.tx.send(SessionEvent::Finished { outcome });
    }

    /// Emits a status line of the given level.
    fn status(&self, level: Level, message: String) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }
        let event = StatusEvent {
            level,
            message,
            elapsed: self.elapsed(),
        };
        let _ = self.tx.send(SessionEvent::Status(event));
    }
}
