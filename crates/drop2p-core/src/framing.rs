//! Length-prefixed messages and sized byte streams over a raw byte connection.
//!
//! The channel is split by direction: [`FrameReader`] owns the read half and
//! [`FrameWriter`] owns the write half, so the receive loop cannot write and
//! the send loop cannot read.
//!
//! Short reads and writes from the transport are normal and are accumulated
//! until the requested byte count is satisfied. A zero-length read while bytes
//! are still expected means the peer closed the connection.

use std::io::{self, Read, Write};

use crate::error::ChannelError;
use crate::protocol::{CHUNK_SIZE, LENGTH_PREFIX};
use crate::stream::{ByteSink, ByteSource};

/// Receiving half of the framed channel.
pub struct FrameReader<R> {
    reader: R,
    chunk: Vec<u8>,
}

impl<R> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> FrameReader<R> {
    /// Read one length-prefixed message.
    ///
    /// Returns [`ChannelError::Timeout`] only if the timeout hit before the
    /// first byte of the length prefix arrived.
    pub fn receive_message(&mut self) -> Result<Vec<u8>, ChannelError> {
        let len = read_prefix(&mut self.reader, true)?;
        let mut payload = vec![0u8; len as usize];
        read_full(&mut self.reader, &mut payload, false)?;
        Ok(payload)
    }

    /// Read one sized stream into `sink`, calling `on_progress(received, size)`
    /// after every chunk. Returns the stream size.
    ///
    /// A zero-size stream moves no chunks and never calls `on_progress`.
    pub fn receive_stream<S, F>(&mut self, sink: &mut S, mut on_progress: F) -> Result<u64, ChannelError>
    where
        S: ByteSink + ?Sized,
        F: FnMut(u64, u64),
    {
        let size = u64::from(read_prefix(&mut self.reader, false)?);
        let mut received: u64 = 0;

        while received < size {
            let want = (size - received).min(self.chunk.len() as u64) as usize;
            let chunk = &mut self.chunk[..want];
            read_full(&mut self.reader, chunk, false)?;
            sink.write_chunk(chunk).map_err(ChannelError::Sink)?;
            received += want as u64;
            on_progress(received, size);
        }

        sink.close().map_err(ChannelError::Sink)?;
        Ok(size)
    }
}

/// Sending half of the framed channel.
pub struct FrameWriter<W> {
    writer: W,
    chunk: Vec<u8>,
}

impl<W> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_chunk_size(writer, CHUNK_SIZE)
    }

    pub fn with_chunk_size(writer: W, chunk_size: usize) -> Self {
        Self {
            writer,
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameWriter<W> {
    /// Write `payload` behind a 4-byte length as one logical send.
    ///
    /// Returns [`ChannelError::Timeout`] only if nothing was written.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ChannelError::TooLarge(payload.len() as u64))?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);

        write_full(&mut self.writer, &frame, true)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write `source.size()` behind a 4-byte prefix, then forward chunks from
    /// `source` until it reports end of data, calling `on_progress(sent, size)`
    /// after every chunk. Returns the number of payload bytes forwarded.
    ///
    /// The loop is a pure forward: if the source under-delivers, fewer bytes
    /// than declared go out.
    pub fn send_stream<S, F>(&mut self, source: &mut S, mut on_progress: F) -> Result<u64, ChannelError>
    where
        S: ByteSource + ?Sized,
        F: FnMut(u64, u64),
    {
        let size = source.size();
        let declared = u32::try_from(size).map_err(|_| ChannelError::TooLarge(size))?;
        write_full(&mut self.writer, &declared.to_be_bytes(), false)?;

        let mut sent: u64 = 0;
        loop {
            let n = source
                .read_chunk(&mut self.chunk)
                .map_err(ChannelError::Source)?;
            if n == 0 {
                break;
            }
            write_full(&mut self.writer, &self.chunk[..n], false)?;
            sent += n as u64;
            on_progress(sent, size);
        }

        self.writer.flush()?;
        Ok(sent)
    }
}

/// Socket read/write timeouts surface as `WouldBlock` on Unix and
/// `TimedOut` on Windows.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn read_prefix<R: Read>(reader: &mut R, at_boundary: bool) -> Result<u32, ChannelError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    read_full(reader, &mut prefix, at_boundary)?;
    Ok(u32::from_be_bytes(prefix))
}

/// Fill `buf` completely. A timeout is only reported as recoverable when
/// `at_boundary` is set and no byte has been consumed yet.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], at_boundary: bool) -> Result<(), ChannelError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) && at_boundary && filled == 0 => {
                return Err(ChannelError::Timeout);
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
    Ok(())
}

/// Write all of `buf`. Same timeout rule as [`read_full`].
fn write_full<W: Write>(writer: &mut W, buf: &[u8], at_boundary: bool) -> Result<(), ChannelError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) && at_boundary && written == 0 => {
                return Err(ChannelError::Timeout);
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
    Ok(())
}
