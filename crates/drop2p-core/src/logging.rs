//! Session observability boundary.
//!
//! The send and receive loops never log directly. They report structured
//! [`SessionEvent`]s to a [`SessionObserver`], which decides where the events
//! go: `tracing`, a UI, a test recorder, or nowhere.

use std::fmt;
use std::path::PathBuf;

/// Which worker emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "recv",
        }
    }
}

/// Events a session can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Rendezvous produced a connection for the room
    Connected { room: String },
    /// Rendezvous found no peer
    ConnectFailed { room: String },
    /// Session went back to disconnected
    Disconnected,
    /// Header sent or received, stream about to start
    FileStarted {
        direction: Direction,
        file: String,
        size: Option<u64>,
        pending_files: u32,
    },
    /// Stream finished
    FileFinished {
        direction: Direction,
        file: String,
        bytes: u64,
    },
    /// Source delivered fewer bytes than it declared
    ShortSource {
        file: String,
        declared: u64,
        sent: u64,
    },
    /// Queued path could not be sent; loop moves on
    FileSkipped { path: PathBuf, reason: String },
    /// Inactivity timeout at a frame boundary; loop retries
    Timeout { direction: Direction },
    /// Error that ends the loop and the session
    Fatal { direction: Direction, error: String },
    /// Loop thread exited
    LoopExited { direction: Direction },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { room } => write!(f, "connected room={}", room),
            Self::ConnectFailed { room } => write!(f, "connect_failed room={}", room),
            Self::Disconnected => write!(f, "disconnected"),
            Self::FileStarted { direction, file, size, pending_files } => match size {
                Some(size) => write!(
                    f,
                    "{}_started file={} size={} pending={}",
                    direction.as_str(), file, size, pending_files
                ),
                None => write!(
                    f,
                    "{}_started file={} pending={}",
                    direction.as_str(), file, pending_files
                ),
            },
            Self::FileFinished { direction, file, bytes } => {
                write!(f, "{}_finished file={} bytes={}", direction.as_str(), file, bytes)
            }
            Self::ShortSource { file, declared, sent } => {
                write!(f, "short_source file={} declared={} sent={}", file, declared, sent)
            }
            Self::FileSkipped { path, reason } => {
                write!(f, "file_skipped path={} reason={}", path.display(), reason)
            }
            Self::Timeout { direction } => write!(f, "{}_timeout", direction.as_str()),
            Self::Fatal { direction, error } => {
                write!(f, "{}_fatal error={}", direction.as_str(), error)
            }
            Self::LoopExited { direction } => write!(f, "{}_loop_exited", direction.as_str()),
        }
    }
}

/// Trait for session observers.
pub trait SessionObserver: Send + Sync {
    fn observe(&self, event: SessionEvent);
}

/// Observer that uses the `tracing` crate.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn observe(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Connected { .. }
            | SessionEvent::Disconnected
            | SessionEvent::FileFinished { .. } => {
                tracing::info!(component = "session", "{}", event);
            }
            SessionEvent::ConnectFailed { .. }
            | SessionEvent::FileSkipped { .. }
            | SessionEvent::ShortSource { .. } => {
                tracing::warn!(component = "session", "{}", event);
            }
            SessionEvent::Fatal { .. } => {
                tracing::error!(component = "session", "{}", event);
            }
            // Per-file and idle noise
            _ => {
                tracing::debug!(component = "session", "{}", event);
            }
        }
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn observe(&self, _event: SessionEvent) {}
}
