//! Payload sources and sinks for the framed channel's streaming mode.
//!
//! File handles are released on drop, so every exit path (completion, error,
//! abandoned transfer) closes them. A failed open returns a typed error and
//! never a half-built adapter.

use std::fs::File;
use std::io::{self, Read, Take, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::StreamError;

/// Sequenced-read source with a size known up front.
pub trait ByteSource {
    /// Total bytes this source promises to yield.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes. `Ok(0)` means end of data.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Sequenced-write sink. Writes land in order with no seeking.
pub trait ByteSink {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush anything buffered. Dropping without calling this still
    /// releases the underlying handle.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File opened for sequential reading.
///
/// `size()` is the on-disk length at open time and is not re-checked. Reads
/// stop at that length even if the file grows; if it shrinks the source
/// yields fewer bytes than promised.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
    reader: Take<File>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StreamError::from_io(path.clone(), e))?;
        let size = file
            .metadata()
            .map_err(|e| StreamError::from_io(path.clone(), e))?
            .len();
        Ok(Self {
            path,
            size,
            reader: file.take(size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// File opened for sequential writing. An existing file is truncated.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| StreamError::from_io(path.clone(), e))?;
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl ByteSink for FileSink {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// In-memory source, mostly for tests and small payloads.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    cursor: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.cursor);
        buf[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
}

/// In-memory sink that collects everything written to it.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    data: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSink for MemorySink {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Sink that counts and drops bytes. Used to consume a stream that has
/// nowhere to go so the next frame still lines up.
#[derive(Debug, Default)]
pub struct DiscardSink {
    discarded: u64,
}

impl DiscardSink {
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl ByteSink for DiscardSink {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.discarded += data.len() as u64;
        Ok(())
    }
}
