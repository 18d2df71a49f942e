/// Integration tests: two clients exchange files over loopback TCP.
///
/// Peer A listens on an ephemeral port and peer B dials it, standing in for
/// the rendezvous service. Each peer writes into its own temp directory.

use std::fs;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use drop2p_core::{
    Client, Direction, FrameWriter, Header, Progress, SessionConfig, SessionEvent,
    SessionObserver, SessionState,
};

const ROOM: &str = "loopback";

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<SessionEvent>>>);

impl SessionObserver for Recorder {
    fn observe(&self, event: SessionEvent) {
        self.0.lock().push(event);
    }
}

impl Recorder {
    fn finished(&self, direction: Direction) -> Vec<(String, u64)> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::FileFinished { direction: d, file, bytes } if *d == direction => {
                    Some((file.clone(), *bytes))
                }
                _ => None,
            })
            .collect()
    }

    fn skipped(&self) -> Vec<PathBuf> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::FileSkipped { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

struct Peer {
    client: Client,
    events: Recorder,
    sent: Receiver<Progress>,
    received: Receiver<Progress>,
    dir: tempfile::TempDir,
}

impl Peer {
    fn output(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    /// Write a patterned file into this peer's outbox directory.
    fn make_file(&self, name: &str, len: usize) -> PathBuf {
        let outbox = self.dir.path().join("outbox");
        fs::create_dir_all(&outbox).unwrap();
        let path = outbox.join(name);
        fs::write(&path, pattern(len)).unwrap();
        path
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("drop2p_core=debug")
        .try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn config(dir: &Path, io_timeout: Duration) -> SessionConfig {
    SessionConfig::default()
        .with_output_dir(dir.join("downloads"))
        .with_idle_poll(Duration::from_millis(100))
        .with_io_timeout(io_timeout)
}

fn peer<C>(connector: C, recv_delay: Option<Duration>) -> Peer
where
    C: drop2p_core::Connector + 'static,
{
    peer_with_timeout(connector, recv_delay, Duration::from_secs(30))
}

fn peer_with_timeout<C>(connector: C, recv_delay: Option<Duration>, io_timeout: Duration) -> Peer
where
    C: drop2p_core::Connector + 'static,
{
    let dir = tempfile::tempdir().unwrap();
    let events = Recorder::default();
    let (send_tx, sent) = crossbeam_channel::unbounded();
    let (recv_tx, received) = crossbeam_channel::unbounded();

    let client = Client::builder(connector)
        .config(config(dir.path(), io_timeout))
        .observer(events.clone())
        .send_progress(send_tx)
        .recv_progress(move |p: Progress| {
            let _ = recv_tx.send(p);
            if let Some(delay) = recv_delay {
                thread::sleep(delay);
            }
        })
        .build();

    Peer {
        client,
        events,
        sent,
        received,
        dir,
    }
}

/// A listens, B dials.
fn pair() -> (Peer, Peer) {
    pair_with_delay(None)
}

fn pair_with_delay(recv_delay: Option<Duration>) -> (Peer, Peer) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let a = peer(
        move |_: &str| listener.accept().ok().map(|(s, _)| s),
        None,
    );
    let b = peer(move |_: &str| TcpStream::connect(addr).ok(), recv_delay);
    (a, b)
}

fn pair_with_timeout(io_timeout: Duration) -> (Peer, Peer) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let a = peer_with_timeout(
        move |_: &str| listener.accept().ok().map(|(s, _)| s),
        None,
        io_timeout,
    );
    let b = peer_with_timeout(move |_: &str| TcpStream::connect(addr).ok(), None, io_timeout);
    (a, b)
}

fn fatal_errors(peer: &Peer, direction: Direction) -> Vec<String> {
    peer.events
        .0
        .lock()
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Fatal { direction: d, error } if *d == direction => Some(error.clone()),
            _ => None,
        })
        .collect()
}

fn connect(a: &Peer, b: &Peer) {
    thread::scope(|s| {
        let listening = s.spawn(|| a.client.start(ROOM));
        b.client.start(ROOM).unwrap();
        listening.join().unwrap().unwrap();
    });
    assert!(a.client.is_connected());
    assert!(b.client.is_connected());
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn photo_arrives_intact() {
    init_tracing();
    let (a, b) = pair();
    let photo = a.make_file("photo.jpg", 1_000_000);
    a.client.enqueue_files([&photo]);

    connect(&a, &b);
    wait_for("photo.jpg", || b.client.files_received() == 1);

    let out = b.output().join("photo.jpg");
    assert_eq!(fs::read(&out).unwrap(), pattern(1_000_000));
    assert_eq!(fs::read_dir(b.output()).unwrap().count(), 1);

    wait_for("send side to finish", || a.client.files_sent() == 1);
    let sent: Vec<Progress> = a.sent.try_iter().collect();
    let last = sent.last().unwrap();
    assert_eq!(last.file, "photo.jpg");
    assert_eq!(last.processed_bytes, 1_000_000);
    assert_eq!(last.file_size, 1_000_000);
    assert!(sent.windows(2).all(|w| w[0].processed_bytes < w[1].processed_bytes));

    let received: Vec<Progress> = b.received.try_iter().collect();
    assert_eq!(received.last().unwrap().processed_bytes, 1_000_000);
    assert_eq!(b.events.finished(Direction::Receive), vec![("photo.jpg".to_string(), 1_000_000)]);
}

#[test]
fn files_arrive_in_queue_order() {
    init_tracing();
    let (a, b) = pair();
    let files = [
        a.make_file("a.txt", 300_000),
        a.make_file("b.txt", 10),
        a.make_file("c.txt", 70_000),
    ];
    a.client.enqueue_files(&files);

    connect(&a, &b);
    wait_for("three files", || b.client.files_received() == 3);

    let names: Vec<String> = b
        .events
        .finished(Direction::Receive)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    assert_eq!(fs::read(b.output().join("c.txt")).unwrap(), pattern(70_000));

    // The first header went out with the other two still queued.
    let first = b.received.try_iter().next().unwrap();
    assert_eq!(first.file, "a.txt");
    assert_eq!(first.pending_files, 2);
}

#[test]
fn empty_file_reports_completion() {
    init_tracing();
    let (a, b) = pair();
    let empty = a.make_file("empty.txt", 0);
    a.client.enqueue_files([empty]);

    connect(&a, &b);
    wait_for("empty.txt", || b.client.files_received() == 1);

    assert_eq!(fs::metadata(b.output().join("empty.txt")).unwrap().len(), 0);
    let done = b.received.try_iter().last().unwrap();
    assert_eq!((done.processed_bytes, done.file_size), (0, 0));
    assert!(done.is_complete());

    wait_for("send side to finish", || a.client.files_sent() == 1);
    let done = a.sent.try_iter().last().unwrap();
    assert_eq!((done.processed_bytes, done.file_size), (0, 0));
}

#[test]
fn missing_file_is_skipped() {
    init_tracing();
    let (a, b) = pair();
    let missing = a.dir.path().join("outbox/missing.bin");
    let real = a.make_file("real.bin", 4096);
    a.client.enqueue_files([missing.clone(), real]);

    connect(&a, &b);
    wait_for("real.bin", || b.client.files_received() == 1);
    wait_for("send side to finish", || a.client.files_sent() == 1);

    assert_eq!(a.events.skipped(), vec![missing]);
    assert!(!b.output().join("missing.bin").exists());
    assert!(a.client.is_connected());
    assert_eq!(b.events.finished(Direction::Receive), vec![("real.bin".to_string(), 4096)]);
}

#[test]
fn failed_start_keeps_queue_for_retry() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let a = peer(
        move |_: &str| listener.accept().ok().map(|(s, _)| s),
        None,
    );
    let first_try = Arc::new(AtomicBool::new(true));
    let b = peer(
        move |_: &str| {
            if first_try.swap(false, Ordering::SeqCst) {
                return None;
            }
            TcpStream::connect(addr).ok()
        },
        None,
    );

    let doc = b.make_file("doc.pdf", 12_345);
    b.client.enqueue_files([&doc]);
    assert!(b.client.start(ROOM).is_err());
    assert_eq!(b.client.state(), SessionState::Disconnected);
    assert_eq!(b.client.pending_files(), vec![doc.clone()]);

    connect(&a, &b);
    wait_for("doc.pdf", || a.client.files_received() == 1);
    assert_eq!(fs::read(a.output().join("doc.pdf")).unwrap(), pattern(12_345));
    assert!(b.client.pending_files().is_empty());
}

#[test]
fn second_start_while_connected_is_rejected() {
    init_tracing();
    let (a, b) = pair();
    connect(&a, &b);
    assert!(matches!(
        b.client.start(ROOM),
        Err(drop2p_core::StartError::AlreadyActive)
    ));
    assert!(b.client.is_connected());
}

#[test]
fn stop_mid_transfer_leaves_partial_file() {
    init_tracing();
    const SIZE: usize = 10 * 1024 * 1024;
    let (a, b) = pair_with_delay(Some(Duration::from_millis(20)));
    let big = a.make_file("big.iso", SIZE);
    a.client.enqueue_files([big]);

    connect(&a, &b);
    b.received
        .recv_timeout(Duration::from_secs(20))
        .expect("first chunk");

    b.client.stop();
    assert_eq!(b.client.state(), SessionState::Disconnected);

    let partial = fs::metadata(b.output().join("big.iso")).unwrap().len();
    assert!(partial > 0);
    assert!(partial < SIZE as u64);
    assert_eq!(b.client.files_received(), 0);

    // The sender notices the closed connection on its own.
    wait_for("sender to disconnect", || !a.client.is_connected());
    assert_eq!(a.client.files_sent(), 0);
}

#[test]
fn peer_disconnect_ends_the_session() {
    init_tracing();
    let (a, b) = pair();
    connect(&a, &b);

    a.client.stop();
    wait_for("peer to observe close", || !b.client.is_connected());
    assert!(b
        .events
        .0
        .lock()
        .iter()
        .any(|e| matches!(e, SessionEvent::Fatal { direction: Direction::Receive, .. })));
}

#[test]
fn both_directions_at_once() {
    init_tracing();
    let (a, b) = pair();
    let from_a = a.make_file("from_a.bin", 2_000_000);
    let from_b = b.make_file("from_b.bin", 1_500_000);
    a.client.enqueue_files([from_a]);
    b.client.enqueue_files([from_b]);

    connect(&a, &b);
    wait_for("both files", || {
        a.client.files_received() == 1 && b.client.files_received() == 1
    });

    assert_eq!(fs::read(b.output().join("from_a.bin")).unwrap(), pattern(2_000_000));
    assert_eq!(fs::read(a.output().join("from_b.bin")).unwrap(), pattern(1_500_000));
}

#[test]
fn files_queued_after_connect_are_sent() {
    init_tracing();
    let (a, b) = pair();
    connect(&a, &b);

    thread::sleep(Duration::from_millis(150));
    let late = a.make_file("late.txt", 999);
    a.client.enqueue_files([late]);

    wait_for("late.txt", || b.client.files_received() == 1);
    assert_eq!(fs::read(b.output().join("late.txt")).unwrap(), pattern(999));
}

#[test]
fn idle_timeouts_do_not_end_the_session() {
    init_tracing();
    let (a, b) = pair_with_timeout(Duration::from_millis(200));
    connect(&a, &b);

    // Several read timeouts pass with nothing on the wire.
    thread::sleep(Duration::from_millis(1200));
    assert!(a.client.is_connected());
    assert!(b.client.is_connected());
    assert!(b
        .events
        .0
        .lock()
        .contains(&SessionEvent::Timeout { direction: Direction::Receive }));

    let late = a.make_file("after_idle.bin", 3_000_000);
    a.client.enqueue_files([late]);
    wait_for("after_idle.bin", || b.client.files_received() == 1);
    assert_eq!(fs::read(b.output().join("after_idle.bin")).unwrap(), pattern(3_000_000));
    assert!(fatal_errors(&a, Direction::Send).is_empty());
    assert!(fatal_errors(&b, Direction::Receive).is_empty());
}

#[test]
fn unwritable_target_is_skipped() {
    init_tracing();
    let (a, b) = pair();
    fs::create_dir_all(b.output().join("clash.bin")).unwrap();
    let clash = a.make_file("clash.bin", 200_000);
    let after = a.make_file("after.bin", 50_000);
    a.client.enqueue_files([clash, after]);

    connect(&a, &b);
    wait_for("after.bin", || b.client.files_received() == 1);

    assert_eq!(b.events.skipped(), vec![b.output().join("clash.bin")]);
    assert!(b.output().join("clash.bin").is_dir());
    assert_eq!(fs::read(b.output().join("after.bin")).unwrap(), pattern(50_000));
    assert_eq!(b.events.finished(Direction::Receive), vec![("after.bin".to_string(), 50_000)]);
    assert!(b.client.is_connected());

    // The sender cannot tell; both files count as sent.
    wait_for("send side to finish", || a.client.files_sent() == 2);
}

#[test]
fn parent_dir_header_ends_the_session() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let b = peer(move |_: &str| TcpStream::connect(addr).ok(), None);

    b.client.start(ROOM).unwrap();
    let (raw, _) = listener.accept().unwrap();
    let mut writer = FrameWriter::new(&raw);
    writer.send_message(&Header::new("..", 0).encode()).unwrap();

    wait_for("receiver to reject the header", || !b.client.is_connected());
    let errors = fatal_errors(&b, Direction::Receive);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("malformed"), "{}", errors[0]);
    assert_eq!(b.client.files_received(), 0);
    assert_eq!(fs::read_dir(b.output()).unwrap().count(), 0);
    drop(raw);
}
