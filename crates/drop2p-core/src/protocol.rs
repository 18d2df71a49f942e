/// Wire format for the duplex file exchange.
///
/// ```text
/// Message:  [0..4]  payload length (u32 BE)
///           [4..]   payload
///
/// Stream:   [0..4]  total size (u32 BE)
///           [4..]   raw bytes, written in chunks of at most CHUNK_SIZE
///                   (chunks are not framed individually)
///
/// Header:   [0..4]  pending files (u32 BE)     <- message payload
///           [4..]   UTF-8 filename (rest of the message)
/// ```
///
/// Per file: one Header message, then exactly one stream. Both peers send
/// and receive concurrently on the same connection.

use crate::error::HeaderError;

/// Size of every length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Default stream chunk size: 256 KiB.
pub const CHUNK_SIZE: usize = 1 << 18;

/// Largest payload a length prefix can declare.
pub const MAX_FRAME_LEN: u64 = u32::MAX as u64;

/// Header preceding every file's byte stream.
///
/// `pending_files` is a snapshot of how many more files were queued behind
/// this one when it was sent. It is a display hint and can be stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub filename: String,
    pub pending_files: u32,
}

impl Header {
    pub fn new(filename: impl Into<String>, pending_files: u32) -> Self {
        Self {
            filename: filename.into(),
            pending_files,
        }
    }

    /// Serialize to the message payload form.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.filename.as_bytes();
        let mut buf = Vec::with_capacity(LENGTH_PREFIX + name.len());
        buf.extend_from_slice(&self.pending_files.to_be_bytes());
        buf.extend_from_slice(name);
        buf
    }

    /// Parse a message payload. The filename is taken verbatim; use
    /// [`sanitize_file_name`] before touching the filesystem.
    pub fn decode(payload: &[u8]) -> Result<Self, HeaderError> {
        if payload.len() < LENGTH_PREFIX {
            return Err(HeaderError::Truncated(payload.len()));
        }
        let pending_files = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let filename = std::str::from_utf8(&payload[LENGTH_PREFIX..])
            .map_err(|_| HeaderError::InvalidUtf8)?
            .to_owned();
        Ok(Self {
            filename,
            pending_files,
        })
    }
}

/// Reduce a peer-supplied filename to its final path component.
///
/// Both `/` and `\` count as separators regardless of platform, so a header
/// from any peer can only name a file directly inside the output directory.
pub fn sanitize_file_name(name: &str) -> Result<&str, HeaderError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    match base {
        "" | "." | ".." => Err(HeaderError::InvalidFileName(name.to_owned())),
        _ if base.contains('\0') => Err(HeaderError::InvalidFileName(name.to_owned())),
        _ => Ok(base),
    }
}

/// One progress notification for a single file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub file: String,
    pub processed_bytes: u64,
    pub file_size: u64,
    pub pending_files: u32,
}

impl Progress {
    /// Progress as a fraction 0.0 - 1.0. An empty file counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        (self.processed_bytes as f64 / self.file_size as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.processed_bytes >= self.file_size
    }
}
