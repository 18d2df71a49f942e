//! Client session: connection lifecycle, queue ownership and loop supervision.
//!
//! ```text
//!            start()                 connector ok, loops spawned
//! Disconnected ────────> Connecting ─────────────────────────────> Connected
//!      ^                     │  connector failed / stop()              │
//!      └─────────────────────┴─────────────────────────────────────────┘
//!                                      stop() or a fatal loop error
//! ```
//!
//! Every transition out of `Connecting`/`Connected` bumps the session epoch.
//! Loops carry the epoch they were started with and stop acting on the
//! session as soon as it no longer matches, so a loop still unwinding from
//! an old connection can never tear down a newer one.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::connection::{self, ShutdownHandle};
use crate::connector::Connector;
use crate::error::StartError;
use crate::logging::{SessionEvent, SessionObserver, TracingObserver};
use crate::progress::{NullSink, ProgressSink};
use crate::queue::OutboundQueue;
use crate::worker;

/// Lifecycle of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Lifecycle {
    state: SessionState,
    shutdown: Option<ShutdownHandle>,
    workers: Vec<JoinHandle<()>>,
}

/// State shared between the caller-facing [`Client`] and its loop threads.
pub(crate) struct Shared {
    lifecycle: Mutex<Lifecycle>,
    /// Only changed while `lifecycle` is held; read lock-free by the loops.
    epoch: AtomicU64,
    connector: Arc<dyn Connector>,
    pub(crate) config: SessionConfig,
    pub(crate) queue: OutboundQueue,
    pub(crate) send_progress: Arc<dyn ProgressSink>,
    pub(crate) recv_progress: Arc<dyn ProgressSink>,
    pub(crate) observer: Arc<dyn SessionObserver>,
    pub(crate) files_sent: AtomicU64,
    pub(crate) files_received: AtomicU64,
}

/// A loop's view of the session it was started for.
pub(crate) struct LoopHandle {
    pub(crate) shared: Arc<Shared>,
    epoch: u64,
}

impl LoopHandle {
    /// Whether the session this loop belongs to is still the current one.
    pub(crate) fn is_live(&self) -> bool {
        self.shared.epoch.load(Ordering::Acquire) == self.epoch
    }

    /// Drive the session to `Disconnected` after a fatal error. Does nothing
    /// if the session has already moved on. Never joins, since the caller is
    /// itself one of the loop threads.
    pub(crate) fn fail(&self) {
        self.shared.end_epoch(self.epoch);
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    fn start(self: &Arc<Self>, room: &str) -> Result<(), StartError> {
        let (epoch, stale) = {
            let mut lc = self.lifecycle.lock();
            if lc.state != SessionState::Disconnected {
                return Err(StartError::AlreadyActive);
            }
            lc.state = SessionState::Connecting;
            let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            (epoch, mem::take(&mut lc.workers))
        };
        // Loops from a session that ended on a fatal error are reaped here.
        join_workers(stale);

        match self.connect(room, epoch) {
            Ok(()) => {
                info!(room, "session connected");
                self.observer.observe(SessionEvent::Connected {
                    room: room.to_owned(),
                });
                Ok(())
            }
            Err(e) => {
                self.end_epoch(epoch);
                if matches!(e, StartError::ConnectFailed(_)) {
                    self.observer.observe(SessionEvent::ConnectFailed {
                        room: room.to_owned(),
                    });
                }
                Err(e)
            }
        }
    }

    fn connect(self: &Arc<Self>, room: &str, epoch: u64) -> Result<(), StartError> {
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|source| StartError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let stream = self
            .connector
            .connect(room)
            .ok_or_else(|| StartError::ConnectFailed(room.to_owned()))?;
        let (reader, writer, shutdown) =
            connection::split(stream, self.config.io_timeout).map_err(StartError::Socket)?;

        let mut lc = self.lifecycle.lock();
        if self.epoch.load(Ordering::Acquire) != epoch || lc.state != SessionState::Connecting {
            shutdown.shutdown();
            return Err(StartError::Cancelled);
        }
        debug!(peer = ?shutdown.peer_addr(), epoch, "spawning transfer loops");
        lc.state = SessionState::Connected;
        lc.shutdown = Some(shutdown);

        let send = LoopHandle {
            shared: Arc::clone(self),
            epoch,
        };
        let send = thread::Builder::new()
            .name("drop2p-send".into())
            .spawn(move || worker::run_send_loop(writer, send))
            .map_err(StartError::Spawn)?;
        lc.workers.push(send);

        let recv = LoopHandle {
            shared: Arc::clone(self),
            epoch,
        };
        let recv = thread::Builder::new()
            .name("drop2p-recv".into())
            .spawn(move || worker::run_recv_loop(reader, recv))
            .map_err(StartError::Spawn)?;
        lc.workers.push(recv);

        Ok(())
    }

    /// Move to `Disconnected` if `epoch` is still current: bump the epoch,
    /// close the connection and wake the send loop. Returns whether this call
    /// performed the transition.
    fn end_epoch(&self, epoch: u64) -> bool {
        let was_connected = {
            let mut lc = self.lifecycle.lock();
            if self.epoch.load(Ordering::Acquire) != epoch
                || lc.state == SessionState::Disconnected
            {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::AcqRel);
            let was_connected = lc.state == SessionState::Connected;
            lc.state = SessionState::Disconnected;
            if let Some(shutdown) = lc.shutdown.take() {
                shutdown.shutdown();
            }
            was_connected
        };
        self.queue.wake();
        if was_connected {
            self.observer.observe(SessionEvent::Disconnected);
        }
        true
    }

    fn stop(&self) {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.end_epoch(epoch);
        let workers = mem::take(&mut self.lifecycle.lock().workers);
        join_workers(workers);
    }
}

/// Join loop threads, skipping the calling thread when `stop` runs from
/// inside a progress sink or observer.
fn join_workers(workers: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in workers {
        if handle.thread().id() == current {
            continue;
        }
        let _ = handle.join();
    }
}

/// One peer's side of a duplex file exchange.
///
/// Files queued with [`enqueue_files`](Self::enqueue_files) are sent in FIFO
/// order once the session is connected; files the peer sends land in
/// [`SessionConfig::output_dir`]. Progress sinks and the observer are called
/// on the loop threads.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Client with default config, `tracing` output and the given progress sinks.
    pub fn new<C, S, R>(connector: C, send_progress: S, recv_progress: R) -> Self
    where
        C: Connector + 'static,
        S: ProgressSink + 'static,
        R: ProgressSink + 'static,
    {
        Self::builder(connector)
            .send_progress(send_progress)
            .recv_progress(recv_progress)
            .build()
    }

    pub fn builder<C: Connector + 'static>(connector: C) -> ClientBuilder {
        ClientBuilder {
            connector: Arc::new(connector),
            config: SessionConfig::default(),
            send_progress: Arc::new(NullSink),
            recv_progress: Arc::new(NullSink),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Connect to `room` and launch both loops. Blocks while the connector
    /// runs.
    pub fn start(&self, room: &str) -> Result<(), StartError> {
        self.shared.start(room)
    }

    /// Like [`start`](Self::start), but connects on a background thread and
    /// reports the outcome to `on_result` exactly once.
    pub fn start_with_callback<F>(&self, room: &str, on_result: F) -> Result<(), StartError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let room = room.to_owned();
        thread::Builder::new()
            .name("drop2p-connect".into())
            .spawn(move || {
                let connected = shared.start(&room).is_ok();
                on_result(connected);
            })
            .map(|_| ())
            .map_err(StartError::Spawn)
    }

    /// Close the connection and wait for both loops to exit. Safe to call in
    /// any state, any number of times.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Append paths to the outbound queue. Works in any state; entries wait
    /// until a session is connected.
    pub fn enqueue_files<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.shared.queue.extend(paths);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == SessionState::Connected
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Paths still waiting to be sent, oldest first.
    pub fn pending_files(&self) -> Vec<PathBuf> {
        self.shared.queue.snapshot()
    }

    pub fn files_sent(&self) -> u64 {
        self.shared.files_sent.load(Ordering::Relaxed)
    }

    pub fn files_received(&self) -> u64 {
        self.shared.files_received.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

#[cfg(test)]
impl Client {
    /// Mark the session connected without a socket and hand out a handle
    /// for driving a loop body over an in-memory transport.
    pub(crate) fn attach_loop(&self) -> LoopHandle {
        self.shared.lifecycle.lock().state = SessionState::Connected;
        LoopHandle {
            shared: Arc::clone(&self.shared),
            epoch: self.shared.epoch.load(Ordering::Acquire),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    send_progress: Arc<dyn ProgressSink>,
    recv_progress: Arc<dyn ProgressSink>,
    observer: Arc<dyn SessionObserver>,
}

impl ClientBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn send_progress<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.send_progress = Arc::new(sink);
        self
    }

    pub fn recv_progress<S: ProgressSink + 'static>(mut self, sink: S) -> Self {
        self.recv_progress = Arc::new(sink);
        self
    }

    pub fn observer<O: SessionObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn build(self) -> Client {
        Client {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle {
                    state: SessionState::Disconnected,
                    shutdown: None,
                    workers: Vec::new(),
                }),
                epoch: AtomicU64::new(0),
                connector: self.connector,
                config: self.config,
                queue: OutboundQueue::new(),
                send_progress: self.send_progress,
                recv_progress: self.recv_progress,
                observer: self.observer,
                files_sent: AtomicU64::new(0),
                files_received: AtomicU64::new(0),
            }),
        }
    }
}
