use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::{Error, Result};

pub const DEFAULT_MAX_WRITE_SIZE: usize = 16 * 1024;
/// Slightly above the default max write size so a single full chunk alone
/// does not trip backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16387;
const DEFAULT_FILE_MODE: u32 = 0o666;

/// Where dispatch work runs.
///
/// `Blocking` performs OS writes, retry backoff sleeps and the close
/// sequence on the calling thread. `Deferred` moves all of that to a
/// dedicated dispatch thread; producer calls only touch buffering state and
/// return immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Blocking,
    Deferred,
}

/// Buffered content representation.
///
/// `Text` validates every write as UTF-8 and never splits a code point
/// across chunks; `Bytes` packs fixed-length binary chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentMode {
    Bytes,
    Text,
}

#[derive(Clone, Debug)]
pub enum Destination {
    /// Backing file path; opened by the sink, reopenable for rotation.
    Path(PathBuf),
    /// Pre-opened descriptor; the sink takes ownership but cannot reopen it
    /// without a path.
    Fd(RawFd),
}

/// Decides whether a transient write error is retried. Receives the error,
/// the bytes still unwritten in the current chunk, and the bytes already
/// written from it.
pub type RetryPredicate = Box<dyn Fn(&std::io::Error, usize, usize) -> bool + Send + Sync>;

pub struct SinkConfig {
    pub destination: Destination,
    /// Bytes buffered before automatic dispatch. 0 dispatches on every write.
    pub flush_threshold: usize,
    /// Bytes above which new data is rejected and reported dropped. 0 means
    /// unbounded.
    pub drop_threshold: usize,
    /// Upper bound per OS write call. Must exceed `flush_threshold`.
    pub max_write_size: usize,
    /// Backpressure threshold for the boolean returned by `write`. `None`
    /// resolves to `max(flush_threshold, DEFAULT_HIGH_WATER_MARK)`.
    pub high_water_mark: Option<usize>,
    pub mode: DispatchMode,
    /// Append to the file on open instead of truncating it.
    pub append: bool,
    /// Recursively create parent directories before opening the path.
    pub create_dirs: bool,
    /// Fsync after every fully written chunk.
    pub fsync_each_write: bool,
    pub content: ContentMode,
    /// `None` retries every transient error.
    pub retry: Option<RetryPredicate>,
    /// Permission bits used when the file is created.
    pub file_mode: u32,
}

impl SinkConfig {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            destination: Destination::Path(path.into()),
            flush_threshold: 0,
            drop_threshold: 0,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            high_water_mark: None,
            mode: DispatchMode::Blocking,
            append: true,
            create_dirs: false,
            fsync_each_write: false,
            content: ContentMode::Bytes,
            retry: None,
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    pub fn fd(fd: RawFd) -> Self {
        Self {
            destination: Destination::Fd(fd),
            ..Self::path("")
        }
    }

    pub fn deferred(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: DispatchMode::Deferred,
            ..Self::path(path)
        }
    }

    pub(crate) fn resolved_high_water_mark(&self) -> usize {
        self.high_water_mark
            .unwrap_or_else(|| self.flush_threshold.max(DEFAULT_HIGH_WATER_MARK))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_write_size == 0 {
            return Err(Error::Config("max_write_size must be non-zero"));
        }
        if self.max_write_size <= self.flush_threshold {
            return Err(Error::Config("max_write_size must exceed flush_threshold"));
        }
        if let Destination::Path(path) = &self.destination {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("destination path is empty"));
            }
        }
        Ok(())
    }
}
