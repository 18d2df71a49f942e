use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::protocol::CHUNK_SIZE;

/// Default inactivity window for blocking socket reads and writes.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(360);

/// How long the send loop waits on an empty queue before re-checking state.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(3);

/// Default directory received files are written to.
pub const DEFAULT_OUTPUT_DIR: &str = "./downloads";

/// Tunables for one [`Client`](crate::session::Client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub output_dir: PathBuf,
    pub io_timeout: Duration,
    pub idle_poll: Duration,
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            io_timeout: DEFAULT_IO_TIMEOUT,
            idle_poll: DEFAULT_IDLE_POLL,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `DROP2P_OUTPUT_DIR`, `DROP2P_IO_TIMEOUT_SECS`,
    /// `DROP2P_IDLE_POLL_SECS` and `DROP2P_CHUNK_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("DROP2P_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = positive(&lookup, "DROP2P_IO_TIMEOUT_SECS")? {
            config.io_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, "DROP2P_IDLE_POLL_SECS")? {
            config.idle_poll = Duration::from_secs(secs);
        }
        if let Some(bytes) = positive(&lookup, "DROP2P_CHUNK_SIZE")? {
            config.chunk_size = usize::try_from(bytes).map_err(|_| ConfigError::InvalidNumber {
                var: "DROP2P_CHUNK_SIZE",
                value: bytes.to_string(),
            })?;
        }

        Ok(config)
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_idle_poll(mut self, idle: Duration) -> Self {
        self.idle_poll = idle;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }
}

fn positive<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, value: raw }),
    }
}
