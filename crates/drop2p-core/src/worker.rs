//! Send and receive loop bodies.
//!
//! Each loop owns one half of the connection and runs on its own thread for
//! the life of a connected session. File-level problems are reported and
//! skipped; anything that breaks the framing ends the session.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use crate::error::ChannelError;
use crate::framing::{FrameReader, FrameWriter};
use crate::logging::{Direction, SessionEvent};
use crate::protocol::{Header, MAX_FRAME_LEN, Progress, sanitize_file_name};
use crate::session::LoopHandle;
use crate::stream::{ByteSink, ByteSource, DiscardSink, FileSink, FileSource};

/// What happened to one queued path.
#[derive(Debug, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    Skipped,
}

/// Drain the outbound queue into `writer` until the session ends.
pub(crate) fn run_send_loop<W: Write>(writer: W, handle: LoopHandle) {
    let shared = &*handle.shared;
    let mut channel = FrameWriter::with_chunk_size(writer, shared.config.chunk_size);

    while handle.is_live() {
        let Some(path) = shared.queue.pop(shared.config.idle_poll) else {
            continue;
        };
        if !handle.is_live() {
            shared.queue.push_front(path);
            break;
        }

        match send_file(&mut channel, &path, &handle) {
            Ok(SendOutcome::Sent) => {
                shared.files_sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(SendOutcome::Skipped) => {}
            Err(ChannelError::Timeout) => {
                // Nothing reached the peer; retry the same file next.
                shared.queue.push_front(path);
                shared.observer.observe(SessionEvent::Timeout {
                    direction: Direction::Send,
                });
            }
            Err(e) => {
                if handle.is_live() {
                    shared.observer.observe(SessionEvent::Fatal {
                        direction: Direction::Send,
                        error: e.to_string(),
                    });
                    handle.fail();
                }
                break;
            }
        }
    }

    shared.observer.observe(SessionEvent::LoopExited {
        direction: Direction::Send,
    });
}

fn send_file<W: Write>(
    channel: &mut FrameWriter<W>,
    path: &Path,
    handle: &LoopHandle,
) -> Result<SendOutcome, ChannelError> {
    let shared = &*handle.shared;
    let skip = |reason: String| {
        shared.observer.observe(SessionEvent::FileSkipped {
            path: path.to_path_buf(),
            reason,
        });
        Ok(SendOutcome::Skipped)
    };

    let mut source = match FileSource::open(path) {
        Ok(source) => Guarded::new(source, handle),
        Err(e) => return skip(e.to_string()),
    };
    let size = source.size();
    if size > MAX_FRAME_LEN {
        return skip(format!("{} bytes exceeds the {} byte stream limit", size, MAX_FRAME_LEN));
    }
    let Some(file) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return skip("path has no file name".into());
    };

    let pending_files = u32::try_from(shared.queue.len()).unwrap_or(u32::MAX);
    channel.send_message(&Header::new(file.as_str(), pending_files).encode())?;

    shared.observer.observe(SessionEvent::FileStarted {
        direction: Direction::Send,
        file: file.clone(),
        size: Some(size),
        pending_files,
    });

    let sink = &shared.send_progress;
    let sent = channel.send_stream(&mut source, |processed_bytes, file_size| {
        sink.on_progress(Progress {
            file: file.clone(),
            processed_bytes,
            file_size,
            pending_files,
        });
    })?;

    if size == 0 {
        sink.on_progress(Progress {
            file: file.clone(),
            processed_bytes: 0,
            file_size: 0,
            pending_files,
        });
    }
    if sent < size {
        shared.observer.observe(SessionEvent::ShortSource {
            file,
            declared: size,
            sent,
        });
        return Err(ChannelError::ShortSource {
            declared: size,
            sent,
        });
    }

    shared.observer.observe(SessionEvent::FileFinished {
        direction: Direction::Send,
        file,
        bytes: sent,
    });
    Ok(SendOutcome::Sent)
}

/// Write every incoming file into the output directory until the session ends.
pub(crate) fn run_recv_loop<R: Read>(reader: R, handle: LoopHandle) {
    let shared = &*handle.shared;
    let mut channel = FrameReader::with_chunk_size(reader, shared.config.chunk_size);

    while handle.is_live() {
        match receive_file(&mut channel, &handle) {
            Ok(true) => {
                shared.files_received.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) if e.is_recoverable() => {
                shared.observer.observe(SessionEvent::Timeout {
                    direction: Direction::Receive,
                });
            }
            Err(e) => {
                if handle.is_live() {
                    shared.observer.observe(SessionEvent::Fatal {
                        direction: Direction::Receive,
                        error: e.to_string(),
                    });
                    handle.fail();
                }
                break;
            }
        }
    }

    shared.observer.observe(SessionEvent::LoopExited {
        direction: Direction::Receive,
    });
}

/// Receive one header and its stream. Returns `false` when the stream had to
/// be discarded because the target file could not be created.
fn receive_file<R: Read>(channel: &mut FrameReader<R>, handle: &LoopHandle) -> Result<bool, ChannelError> {
    let shared = &*handle.shared;
    let payload = channel.receive_message()?;
    let header = Header::decode(&payload)?;
    let file = sanitize_file_name(&header.filename)?.to_owned();
    let pending_files = header.pending_files;

    shared.observer.observe(SessionEvent::FileStarted {
        direction: Direction::Receive,
        file: file.clone(),
        size: None,
        pending_files,
    });

    let target = shared.config.output_dir.join(&file);
    let mut sink = match FileSink::create(&target) {
        Ok(sink) => Guarded::new(sink, handle),
        Err(e) => {
            shared.observer.observe(SessionEvent::FileSkipped {
                path: target,
                reason: e.to_string(),
            });
            channel.receive_stream(&mut DiscardSink::default(), |_, _| {})?;
            return Ok(false);
        }
    };

    let progress = &shared.recv_progress;
    let size = channel.receive_stream(&mut sink, |processed_bytes, file_size| {
        progress.on_progress(Progress {
            file: file.clone(),
            processed_bytes,
            file_size,
            pending_files,
        });
    })?;

    if size == 0 {
        progress.on_progress(Progress {
            file: file.clone(),
            processed_bytes: 0,
            file_size: 0,
            pending_files,
        });
    }

    shared.observer.observe(SessionEvent::FileFinished {
        direction: Direction::Receive,
        file,
        bytes: size,
    });
    Ok(true)
}

/// Source or sink that fails the next chunk once the session has moved on,
/// so a stopped session abandons the current file instead of finishing it
/// from bytes already buffered in the kernel.
struct Guarded<'a, T> {
    inner: T,
    handle: &'a LoopHandle,
}

impl<'a, T> Guarded<'a, T> {
    fn new(inner: T, handle: &'a LoopHandle) -> Self {
        Self { inner, handle }
    }

    fn check(&self) -> io::Result<()> {
        if self.handle.is_live() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "session stopped"))
        }
    }
}

impl<T: ByteSource> ByteSource for Guarded<'_, T> {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read_chunk(buf)
    }
}

impl<T: ByteSink> ByteSink for Guarded<'_, T> {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.check()?;
        self.inner.write_chunk(data)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}
