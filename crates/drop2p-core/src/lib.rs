//! drop2p core: duplex peer-to-peer file exchange over one TCP connection.
//!
//! Provides:
//! - Length-prefixed messages and sized byte streams ([`framing`])
//! - File and in-memory payload adapters ([`stream`])
//! - A FIFO outbound queue shared by the caller and the send loop
//! - A client session running one send loop and one receive loop
//! - Structured session events routed to `tracing` or a custom observer

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod framing;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod stream;
mod worker;

// Re-export key types for convenience.
pub use config::SessionConfig;
pub use connector::{Connector, DirectConnector};
pub use error::{ChannelError, ConfigError, HeaderError, StartError, StreamError};
pub use framing::{FrameReader, FrameWriter};
pub use logging::{Direction, NullObserver, SessionEvent, SessionObserver, TracingObserver};
pub use progress::{NullSink, ProgressSink};
pub use protocol::{CHUNK_SIZE, Header, Progress, sanitize_file_name};
pub use queue::OutboundQueue;
pub use session::{Client, ClientBuilder, SessionState};
pub use stream::{ByteSink, ByteSource, DiscardSink, FileSink, FileSource, MemorySink, MemorySource};
