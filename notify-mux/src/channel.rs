//! The notification channel seam.
//!
//! Everything that talks to the kernel goes through [`Channel`]. The registry uses the watch
//! operations, the dispatcher is the only caller of [`Channel::read_raw`].

use notify_mux_types::{event::WatchId, mask::EventMask};
use std::{io, path::Path};

/// A source of raw notification records.
///
/// All methods take `&self`: watches are added and removed from any thread while the dispatch
/// loop is blocked in `read_raw`.
pub trait Channel: Send + Sync {
    /// Installs (or updates) the watch for `path` and returns its identifier.
    ///
    /// The same identifier is returned for every path resolving to the same inode.
    fn add_watch(&self, path: &Path, mask: EventMask) -> io::Result<WatchId>;

    /// Removes a watch. The kernel answers with an [`EventMask::IGNORED`] record.
    fn remove_watch(&self, wd: WatchId) -> io::Result<()>;

    /// Blocks until records are available and copies as many bytes as fit into `buf`.
    ///
    /// Returns `Ok(0)` once the channel is closed. A read interrupted by [`Channel::wake`]
    /// fails with [`io::ErrorKind::Interrupted`] without consuming anything.
    fn read_raw(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Interrupts a `read_raw` call blocked on another thread.
    fn wake(&self) -> io::Result<()> {
        Ok(())
    }

    /// Releases the channel. Further reads return `Ok(0)`; closing twice is not an error.
    fn close(&self) -> io::Result<()>;
}
