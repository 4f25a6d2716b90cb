//! The `EventMask` bit set shared by watch registration and decoded records.
//!
//! The values are the kernel's own (see [inotify(7)]) and travel unchanged in both directions:
//! as the interest mask handed to `inotify_add_watch` and as the `mask` field of each record
//! read back from the descriptor.
//!
//! [inotify(7)]: http://man7.org/linux/man-pages/man7/inotify.7.html

use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// Event, option and information bits of an inotify watch or record.
    ///
    /// ```
    /// use notify_mux_types::mask::EventMask;
    ///
    /// let interest = EventMask::CREATE | EventMask::DELETE;
    /// assert_eq!(interest.bits(), 0x300);
    /// assert!(interest.intersects(EventMask::CREATE | EventMask::ISDIR));
    /// ```
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct EventMask: u32 {
        /// Event: File was accessed.
        ///
        /// When monitoring a directory, the event may occur both for the
        /// directory itself and the files within.
        const ACCESS = 0x0000_0001;

        /// Event: File was modified.
        ///
        /// When monitoring a directory, the event may occur *only* for
        /// the files within, not the directory itself.
        const MODIFY = 0x0000_0002;

        /// Event: Metadata has changed.
        ///
        /// This can include permissions, timestamps, extended attributes,
        /// link count and ownership.
        const ATTRIB = 0x0000_0004;

        /// Event: File opened for writing was closed.
        const CLOSE_WRITE = 0x0000_0008;

        /// Event: File not opened for writing was closed.
        const CLOSE_NOWRITE = 0x0000_0010;

        /// Event: File was opened.
        const OPEN = 0x0000_0020;

        /// Event: File or directory was moved away.
        ///
        /// Paired with [`MOVED_TO`](Self::MOVED_TO) through the record cookie.
        const MOVED_FROM = 0x0000_0040;

        /// Event: File or directory was moved in.
        const MOVED_TO = 0x0000_0080;

        /// Event: File or directory was created.
        ///
        /// This may also include hard links, symlinks, and UNIX sockets.
        const CREATE = 0x0000_0100;

        /// Event: File or directory was deleted.
        const DELETE = 0x0000_0200;

        /// Event: Watched file or directory was deleted.
        ///
        /// An [`IGNORED`](Self::IGNORED) record will subsequently be generated.
        const DELETE_SELF = 0x0000_0400;

        /// Event: Watched file or directory was moved.
        const MOVE_SELF = 0x0000_0800;

        /// Info: Filesystem containing the watched object was unmounted.
        ///
        /// An [`IGNORED`](Self::IGNORED) record will subsequently be generated.
        const UNMOUNT = 0x0000_2000;

        /// Info: Event queue overflowed.
        ///
        /// Records carrying this bit use [`WatchId::OVERFLOW`](crate::event::WatchId::OVERFLOW).
        const Q_OVERFLOW = 0x0000_4000;

        /// Info: Watch was removed.
        ///
        /// This can occur either as a result of `inotify_rm_watch()`, because the watched object
        /// was deleted, because the containing filesystem was unmounted, or after a
        /// [`ONESHOT`](Self::ONESHOT) watch fired.
        const IGNORED = 0x0000_8000;

        /// Option: Only watch the path if it is a directory.
        const ONLYDIR = 0x0100_0000;

        /// Option: Don't dereference the path if it is a symlink.
        const DONT_FOLLOW = 0x0200_0000;

        /// Option: Don't generate events for children after they have been unlinked from the
        /// watched directory.
        const EXCL_UNLINK = 0x0400_0000;

        /// Option: Add events to an existing watch instead of replacing its mask.
        const MASK_ADD = 0x2000_0000;

        /// Info: Subject of this event is a directory.
        const ISDIR = 0x4000_0000;

        /// Option: Listen for one event, then remove the watch.
        const ONESHOT = 0x8000_0000;

        /// Event: File opened was closed, with or without writing.
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();

        /// Event: File or directory was moved away or in.
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();

        /// Every event a watch can subscribe to.
        const ALL_EVENTS = Self::ACCESS.bits()
            | Self::MODIFY.bits()
            | Self::ATTRIB.bits()
            | Self::CLOSE_WRITE.bits()
            | Self::CLOSE_NOWRITE.bits()
            | Self::OPEN.bits()
            | Self::MOVED_FROM.bits()
            | Self::MOVED_TO.bits()
            | Self::CREATE.bits()
            | Self::DELETE.bits()
            | Self::DELETE_SELF.bits()
            | Self::MOVE_SELF.bits();
    }
}

impl EventMask {
    /// Bits the kernel reports on every watch whether or not they were requested.
    pub const ALWAYS_REPORTED: EventMask = EventMask::UNMOUNT
        .union(EventMask::Q_OVERFLOW)
        .union(EventMask::IGNORED);

    /// Bits that only modify how a watch is installed.
    pub const OPTIONS: EventMask = EventMask::ONLYDIR
        .union(EventMask::DONT_FOLLOW)
        .union(EventMask::EXCL_UNLINK)
        .union(EventMask::MASK_ADD)
        .union(EventMask::ONESHOT);

    /// Returns only the event bits, dropping options and information bits.
    pub fn events(self) -> EventMask {
        self & EventMask::ALL_EVENTS
    }

    /// Returns only the watch option bits.
    pub fn options(self) -> EventMask {
        self & EventMask::OPTIONS
    }

    /// Indicates whether the kernel queue overflowed.
    pub fn is_overflow(self) -> bool {
        self.contains(EventMask::Q_OVERFLOW)
    }

    /// Indicates whether the watch was retired by the kernel.
    pub fn is_ignored(self) -> bool {
        self.contains(EventMask::IGNORED)
    }

    /// Indicates whether the subject is a directory.
    pub fn is_dir(self) -> bool {
        self.contains(EventMask::ISDIR)
    }

    /// Indicates whether the watch is removed after its first event.
    pub fn is_oneshot(self) -> bool {
        self.contains(EventMask::ONESHOT)
    }
}
