//! The decoded `Event` record and the `WatchId` it refers to.

use std::{
    ffi::{OsStr, OsString},
    fmt,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::mask::EventMask;

/// Kernel-assigned identifier of a watch.
///
/// Identifiers are unique for the lifetime of the descriptor that issued them. The value
/// [`WatchId::OVERFLOW`] never names a watch: it marks queue overflow records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct WatchId(i32);

impl WatchId {
    /// Identifier carried by [`EventMask::Q_OVERFLOW`] records.
    pub const OVERFLOW: WatchId = WatchId(-1);

    /// Wraps a raw watch descriptor.
    pub const fn new(raw: i32) -> Self {
        WatchId(raw)
    }

    /// Returns the raw watch descriptor.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Indicates whether this is the overflow sentinel.
    pub const fn is_overflow(self) -> bool {
        self.0 == WatchId::OVERFLOW.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for WatchId {
    fn from(raw: i32) -> Self {
        WatchId(raw)
    }
}

/// One record read from the notification channel.
///
/// Events are produced by the decoder and handed to listeners by reference; they are not
/// modified after construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    wd: WatchId,
    mask: EventMask,
    cookie: u32,
    name: Option<OsString>,
}

impl Event {
    /// Creates an event about the watched object itself.
    pub fn new(wd: WatchId, mask: EventMask) -> Self {
        Event {
            wd,
            mask,
            cookie: 0,
            name: None,
        }
    }

    /// Creates the record the kernel emits when its queue overflows.
    pub fn overflow() -> Self {
        Event::new(WatchId::OVERFLOW, EventMask::Q_OVERFLOW)
    }

    /// Sets the rename correlation cookie.
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    /// Sets the name of the directory entry the event is about.
    pub fn with_name<N: Into<OsString>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the name if there is one.
    pub fn with_some_name(mut self, name: Option<OsString>) -> Self {
        self.name = name;
        self
    }

    /// Watch the event was reported on.
    pub fn wd(&self) -> WatchId {
        self.wd
    }

    /// What happened.
    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// Correlates the two halves of a rename; zero when unused.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Name of the entry inside a watched directory, absent when the event is about the watched
    /// object itself.
    pub fn name(&self) -> Option<&OsStr> {
        self.name.as_deref()
    }

    /// Indicates whether this is a queue overflow notification.
    ///
    /// Overflow records carry no watch identity and are never routed to subscriptions.
    pub fn is_overflow(&self) -> bool {
        self.mask.is_overflow() || self.wd.is_overflow()
    }

    /// Indicates whether the kernel retired the watch with this event.
    pub fn is_ignored(&self) -> bool {
        self.mask.is_ignored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder() {
        let event = Event::new(WatchId::new(7), EventMask::MOVED_FROM)
            .with_cookie(42)
            .with_name("a.txt");

        assert_eq!(event.wd(), WatchId::new(7));
        assert_eq!(event.mask(), EventMask::MOVED_FROM);
        assert_eq!(event.cookie(), 42);
        assert_eq!(event.name(), Some(OsStr::new("a.txt")));
        assert!(!event.is_overflow());
    }

    #[test]
    fn overflow_sentinel() {
        let event = Event::overflow();
        assert!(event.is_overflow());
        assert_eq!(event.wd().get(), -1);
        assert_eq!(event.name(), None);
    }

    #[test]
    fn self_event_has_no_name() {
        let event = Event::new(WatchId::new(1), EventMask::DELETE_SELF).with_some_name(None);
        assert_eq!(event.name(), None);
    }

    #[test]
    fn watch_id_display() {
        assert_eq!(WatchId::new(12).to_string(), "12");
        assert_eq!(WatchId::from(3), WatchId::new(3));
    }
}
