/// Error types for the framed channel, file adapters and session lifecycle.
///
/// Classification follows the transport contract: only a [`ChannelError::Timeout`]
/// observed at a frame boundary is recoverable. Everything else on the wire is
/// fatal for the loop that saw it, because the protocol cannot resynchronise
/// once a frame has been partially moved.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the framed channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No data moved within the inactivity window, before any byte of the
    /// current frame was transferred.
    #[error("timed out waiting for peer")]
    Timeout,

    /// The peer closed the connection while bytes were still expected.
    #[error("connection closed by peer")]
    Closed,

    /// A payload does not fit the 32-bit length prefix.
    #[error("payload of {0} bytes exceeds the 32-bit length prefix")]
    TooLarge(u64),

    /// The local source ended before the declared stream length. The peer
    /// still expects the missing bytes, so the framing is lost.
    #[error("source ended after {sent} of {declared} declared bytes")]
    ShortSource { declared: u64, sent: u64 },

    /// A frame decoded but its contents violate the protocol.
    #[error("malformed frame: {0}")]
    Malformed(#[from] HeaderError),

    /// The local payload source failed mid-stream.
    #[error("reading local source failed: {0}")]
    Source(#[source] io::Error),

    /// The local payload sink failed mid-stream.
    #[error("writing local sink failed: {0}")]
    Sink(#[source] io::Error),

    /// Any other socket-level failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// Whether the owning loop may retry its next iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }
}

/// Errors decoding a transfer header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header is {0} bytes, need at least 4")]
    Truncated(usize),

    #[error("filename is not valid UTF-8")]
    InvalidUtf8,

    #[error("filename {0:?} does not name a file")]
    InvalidFileName(String),
}

/// Errors acquiring a file-backed source or sink.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StreamError {
    pub(crate) fn from_io(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StreamError::NotFound(path)
        } else {
            StreamError::Open { path, source }
        }
    }
}

/// Errors from [`Client::start`](crate::session::Client::start).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("session is already connecting or connected")]
    AlreadyActive,

    #[error("no peer reachable for room {0:?}")]
    ConnectFailed(String),

    #[error("stopped while connecting")]
    Cancelled,

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot configure connection: {0}")]
    Socket(#[source] io::Error),

    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Errors loading [`SessionConfig`](crate::config::SessionConfig) from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}
