//! Configuration types

use crate::{Error, Result};

/// Size of the fixed part of a record: watch id, mask, cookie and name length.
pub const HEADER_SIZE: usize = 16;

/// Longest padded name the kernel emits: `NAME_MAX` plus the terminating NUL.
pub const MAX_NAME_LEN: usize = 256;

/// Multiplexer configuration
///
/// ```rust
/// # use notify_mux::Config;
/// let config = Config::default()
///     .with_read_chunk_size(16 * 1024)
///     .with_close_on_exec(false);
/// assert!(config.validate().is_ok());
/// ```
///
/// None of these options can be changed once the channel is open.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Config {
    /// See [Config::with_read_chunk_size]
    read_chunk_size: usize,

    /// See [Config::with_max_name_len]
    max_name_len: usize,

    close_on_exec: bool,
}

impl Config {
    /// Number of bytes requested from the channel per read.
    ///
    /// Larger chunks drain a busy queue in fewer system calls. The chunk must be able to hold at
    /// least one maximal record, otherwise the kernel rejects the read.
    ///
    /// The default is 4096 bytes.
    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }

    /// Returns current setting
    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    /// Largest `name_length` a record may declare.
    ///
    /// A record announcing a longer name cannot come from the kernel, and the stream is
    /// reported as malformed. The default, [`MAX_NAME_LEN`], matches Linux.
    pub fn with_max_name_len(mut self, max_name_len: usize) -> Self {
        self.max_name_len = max_name_len;
        self
    }

    /// Returns current setting
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Whether the channel descriptor is closed in child processes after `exec`.
    ///
    /// On by default.
    pub fn with_close_on_exec(mut self, close_on_exec: bool) -> Self {
        self.close_on_exec = close_on_exec;
        self
    }

    /// Returns current setting
    pub fn close_on_exec(&self) -> bool {
        self.close_on_exec
    }

    /// Size of the largest record this configuration accepts.
    pub fn max_record_size(&self) -> usize {
        HEADER_SIZE + self.max_name_len
    }

    /// Size of the decode buffer: one read chunk plus one partially received record.
    pub fn buffer_capacity(&self) -> usize {
        self.read_chunk_size + self.max_record_size()
    }

    /// Checks that the settings are usable together.
    pub fn validate(&self) -> Result<()> {
        if self.max_name_len == 0 {
            return Err(Error::InvalidConfig("max_name_len must not be zero".into()));
        }
        if self.read_chunk_size < self.max_record_size() {
            return Err(Error::InvalidConfig(format!(
                "read_chunk_size {} cannot hold a record of {} bytes",
                self.read_chunk_size,
                self.max_record_size()
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_chunk_size: 4096,
            max_name_len: MAX_NAME_LEN,
            close_on_exec: true,
        }
    }
}
