//! FIFO of file paths waiting to be sent.
//!
//! The caller appends from any thread; the send loop is the only consumer.
//! `pop` blocks on a condvar with an idle timeout and returns early when
//! [`OutboundQueue::wake`] is called, so `stop()` never waits out the timeout.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Inner {
    paths: VecDeque<PathBuf>,
    /// Bumped by `wake`; waiters compare against the value they started with.
    wake_epoch: u64,
}

#[derive(Default)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append paths in order.
    pub fn extend<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut inner = self.inner.lock();
        let before = inner.paths.len();
        inner.paths.extend(paths.into_iter().map(Into::into));
        let added = inner.paths.len() - before;
        drop(inner);

        match added {
            0 => {}
            1 => {
                self.available.notify_one();
            }
            _ => {
                self.available.notify_all();
            }
        }
    }

    /// Put a path back at the head, ahead of everything already queued.
    pub fn push_front(&self, path: PathBuf) {
        self.inner.lock().paths.push_front(path);
        self.available.notify_one();
    }

    /// Take the oldest path, waiting up to `idle` for one to arrive.
    ///
    /// Returns `None` on timeout or when woken by [`wake`](Self::wake) with
    /// nothing queued.
    pub fn pop(&self, idle: Duration) -> Option<PathBuf> {
        let deadline = Instant::now() + idle;
        let mut inner = self.inner.lock();
        let epoch = inner.wake_epoch;

        loop {
            if let Some(path) = inner.paths.pop_front() {
                return Some(path);
            }
            if inner.wake_epoch != epoch {
                return None;
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return inner.paths.pop_front();
            }
        }
    }

    /// Release every thread blocked in [`pop`](Self::pop).
    pub fn wake(&self) {
        self.inner.lock().wake_epoch += 1;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().paths.is_empty()
    }

    /// Copy of the queued paths, oldest first.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.inner.lock().paths.iter().cloned().collect()
    }
}
