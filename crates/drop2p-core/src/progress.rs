//! Progress sinks supplied by the caller.
//!
//! Sinks are invoked synchronously on the send or receive worker thread, not
//! on the thread that built the session. A sink that feeds a UI must hand the
//! value off without blocking; [`crossbeam_channel::Sender`] does exactly that.

use crossbeam_channel::{Sender, TrySendError};

use crate::protocol::Progress;

/// Receives progress notifications for one transfer direction.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        self(progress)
    }
}

/// Forwards into a channel. A full bounded channel drops the update rather
/// than stalling the transfer; a later update supersedes it anyway.
impl ProgressSink for Sender<Progress> {
    fn on_progress(&self, progress: Progress) {
        match self.try_send(progress) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_progress(&self, _progress: Progress) {}
}
