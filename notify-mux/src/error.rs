//! Error types

use notify_mux_types::event::WatchId;
use std::{io, path::PathBuf};

/// Type alias to use this library's [`Error`] type in a `Result`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors generated by the registry, the decoder and the dispatch loop
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The kernel refused to install a watch.
    ///
    /// Returned to the caller of `subscribe`; the rest of the system is unaffected.
    #[error("cannot watch {}: {source}", .path.display())]
    WatchCreationFailed {
        /// Path that was to be watched.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The subscription was cancelled before, or its watch was retired by the kernel.
    #[error("subscription on watch {wd} is already cancelled")]
    AlreadyCancelled {
        /// Watch the subscription was registered on.
        wd: WatchId,
    },

    /// The byte stream cannot be decoded; the dispatch loop stops.
    #[error("malformed event stream at byte {offset}: {reason}")]
    MalformedEventStream {
        /// Stream offset of the offending record header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The channel has been closed.
    #[error("notification channel is closed")]
    ChannelClosed,

    /// Reading from or controlling the channel failed.
    #[error("notification channel error: {0}")]
    ChannelError(#[source] io::Error),

    /// A listener panicked while handling an event.
    ///
    /// Only ever logged by the dispatcher, never returned from the loop.
    #[error("listener for {} failed: {message}", .path.display())]
    ListenerFailure {
        /// Path of the subscription whose listener failed.
        path: PathBuf,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wraps an `add_watch` failure.
    pub fn watch_creation<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        Error::WatchCreationFailed {
            path: path.into(),
            source,
        }
    }

    /// Wraps a channel I/O failure.
    pub fn channel(err: io::Error) -> Self {
        Error::ChannelError(err)
    }

    /// Indicates whether a watch could not be created because the per-user watch limit was hit.
    ///
    /// The kernel reports this as `ENOSPC`, which has nothing to do with disk space. Raising
    /// `fs.inotify.max_user_watches` is the usual fix.
    pub fn is_watch_limit(&self) -> bool {
        matches!(
            self,
            Error::WatchCreationFailed { source, .. } if source.raw_os_error() == Some(libc::ENOSPC)
        )
    }

    /// Indicates whether a watch could not be created because the path does not exist.
    pub fn is_path_not_found(&self) -> bool {
        matches!(
            self,
            Error::WatchCreationFailed { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::ChannelError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_limit_is_recognised() {
        let err = Error::watch_creation("/tmp/a", io::Error::from_raw_os_error(libc::ENOSPC));
        assert!(err.is_watch_limit());
        assert!(!err.is_path_not_found());
    }

    #[test]
    fn missing_path_is_recognised() {
        let err = Error::watch_creation("/nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_path_not_found());
        assert_eq!(
            err.to_string(),
            format!("cannot watch /nope: {}", io::Error::from(io::ErrorKind::NotFound))
        );
    }

    #[test]
    fn already_cancelled_message() {
        let err = Error::AlreadyCancelled {
            wd: WatchId::new(4),
        };
        assert_eq!(err.to_string(), "subscription on watch 4 is already cancelled");
    }
}
