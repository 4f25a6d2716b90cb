//! Fan-out of one inotify event stream to many independent subscribers
//!
//! # Installation
//!
//! ```toml
//! [dependencies]
//! notify-mux = "0.1.0"
//! ```
//!
//! ## Features
//!
//! List of compilation features, see below for details
//!
//! - `serde` for serialization of events
//! - `crossbeam-channel`, `flume`, `tokio` and `futures` implement [`Listener`] for the senders
//!   of those channels
//!
//! ### Serde
//!
//! Events are serializable via [serde](https://serde.rs) if the `serde` feature is enabled:
//!
//! ```toml
//! notify-mux = { version = "0.1.0", features = ["serde"] }
//! ```
//!
//! # How it works
//!
//! A [`Multiplexer`] owns one inotify descriptor. Every [`subscribe`](Multiplexer::subscribe)
//! adds (or widens) the kernel watch for a path and records the subscription in a [`Registry`]
//! keyed by the kernel's watch descriptor. Several subscriptions may share one watch. A single
//! [`Dispatcher`] thread reads the descriptor, decodes the records and calls every subscription
//! whose mask matches, in the order they were registered.
//!
//! Listeners run on the dispatch thread. A slow listener delays all others; hand the work to
//! another thread by subscribing with a channel sender instead of a closure.
//!
//! # Examples
//!
//! ```no_run
//! use notify_mux::{Config, Event, EventMask, Multiplexer};
//! use std::path::Path;
//!
//! fn main() -> notify_mux::Result<()> {
//!     let mut mux = Multiplexer::new(Config::default())?;
//!
//!     // Closures are listeners
//!     mux.subscribe(
//!         "/tmp",
//!         EventMask::CLOSE_WRITE,
//!         |path: &Path, event: &Event, tag: &&str| {
//!             println!("{tag}: {} {:?}", path.display(), event.name());
//!         },
//!         "writes",
//!     )?;
//!
//!     // And so are channel senders
//!     let (tx, rx) = std::sync::mpsc::channel();
//!     let sub = mux.subscribe("/tmp", EventMask::CREATE | EventMask::DELETE, tx, "entries")?;
//!
//!     mux.start()?;
//!     for notification in rx.iter().take(10) {
//!         println!("{notification:?}");
//!     }
//!
//!     mux.cancel(&sub)?;
//!     mux.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Known Problems
//!
//! ### Queue overflow
//!
//! The kernel queue is bounded. When it fills up, events are dropped and a single overflow
//! record is delivered in their place. Overflows go to the [`OverflowHandler`] installed with
//! [`Multiplexer::with_overflow_handler`], never to subscriptions. The default handler logs a
//! warning.
//!
//! ### No space left on device
//!
//! This may be the case of running into the max-files watched limits of your user or system.
//! [`Error::is_watch_limit`] recognises it.
//!
//! You may increase this limit in linux via
//! ```sh
//! sudo sysctl fs.inotify.max_user_instances=8192 # example number
//! sudo sysctl fs.inotify.max_user_watches=524288 # example number
//! sudo sysctl -p
//! ```
//!
//! ### Parent folder deletion
//!
//! Watches are not recursive. If you want to receive an event for a deletion of folder `b` for
//! the path `/a/b/..`, you will have to watch its parent `/a`.

#![deny(missing_docs)]

pub use channel::Channel;
pub use config::{Config, HEADER_SIZE, MAX_NAME_LEN};
pub use decoder::{Decoder, HexDump};
pub use dispatcher::{DispatchStats, Dispatcher, Exit, LogOverflow, OverflowHandler, StopHandle};
pub use error::{Error, Result};
pub use mux::Multiplexer;
pub use notify_mux_types::{
    event::{self, Event, WatchId},
    mask::{self, EventMask},
};
pub use registry::{Registry, Subscription};
use std::path::{Path, PathBuf};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::inotify::InotifyChannel;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod inotify;

pub mod channel;
pub mod decoder;
pub mod dispatcher;
pub mod registry;

mod config;
mod error;
mod mux;


/// The set of requirements for subscription listeners.
///
/// A listener is called once for every event on its watch that matches the subscription's mask,
/// with the subscribed path and the context given to `subscribe`. Calls happen on the dispatch
/// thread, one at a time. A panicking listener is logged and skipped; the remaining listeners
/// still see the event.
///
/// # Example implementation
///
/// ```no_run
/// use notify_mux::{Event, Listener};
/// use std::path::Path;
///
/// /// Prints received events
/// struct EventPrinter;
///
/// impl Listener<u32> for EventPrinter {
///     fn process_event(&self, path: &Path, event: &Event, context: &u32) {
///         println!("[{context}] {}: {:?}", path.display(), event);
///     }
/// }
/// ```
pub trait Listener<C>: Send + Sync + 'static {
    /// Handles one event.
    fn process_event(&self, path: &Path, event: &Event, context: &C);
}

impl<C, F> Listener<C> for F
where
    F: Fn(&Path, &Event, &C) + Send + Sync + 'static,
{
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        (self)(path, event, context);
    }
}

/// An event together with the subscription it was delivered to, as sent by the channel sender
/// listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification<C> {
    path: PathBuf,
    event: Event,
    context: C,
}

impl<C> Notification<C> {
    /// Bundles an event with the subscribed path and context.
    pub fn new<P: Into<PathBuf>>(path: P, event: Event, context: C) -> Self {
        Notification {
            path: path.into(),
            event,
            context,
        }
    }

    /// The subscribed path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The subscription's context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Splits the notification into its parts.
    pub fn into_parts(self) -> (PathBuf, Event, C) {
        (self.path, self.event, self.context)
    }
}

fn notification<C: Clone>(path: &Path, event: &Event, context: &C) -> Notification<C> {
    Notification::new(path, event.clone(), context.clone())
}

#[cfg(feature = "crossbeam-channel")]
impl<C: Clone + Send + 'static> Listener<C> for crossbeam_channel::Sender<Notification<C>> {
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.send(notification(path, event, context));
    }
}

#[cfg(feature = "flume")]
impl<C: Clone + Send + 'static> Listener<C> for flume::Sender<Notification<C>> {
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.send(notification(path, event, context));
    }
}

#[cfg(feature = "futures")]
impl<C: Clone + Send + 'static> Listener<C>
    for futures::channel::mpsc::UnboundedSender<Notification<C>>
{
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.unbounded_send(notification(path, event, context));
    }
}

#[cfg(feature = "tokio")]
impl<C: Clone + Send + 'static> Listener<C> for tokio::sync::mpsc::UnboundedSender<Notification<C>> {
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.send(notification(path, event, context));
    }
}

impl<C: Clone + Send + 'static> Listener<C> for std::sync::mpsc::Sender<Notification<C>> {
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.send(notification(path, event, context));
    }
}

/// Blocks the dispatch thread while the channel is full.
///
/// [`Multiplexer::close`] and dropping the multiplexer join that thread, so they hang for as long
/// as the receiver neither drains the channel nor is dropped.
impl<C: Clone + Send + 'static> Listener<C> for std::sync::mpsc::SyncSender<Notification<C>> {
    fn process_event(&self, path: &Path, event: &Event, context: &C) {
        let _ = self.send(notification(path, event, context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    fn create() -> Event {
        Event::new(WatchId::new(1), EventMask::CREATE).with_name("x.txt")
    }

    #[test]
    fn test_object_safe() {
        let _listener: &dyn Listener<u32> = &|_: &Path, _: &Event, _: &u32| {};
        let _channel: Option<&dyn Channel> = None;
        let _overflow: &dyn OverflowHandler = &LogOverflow;
    }

    #[test]
    fn test_debug_impl() {
        macro_rules! assert_debug_impl {
            ($t:ty) => {{
                #[allow(dead_code)]
                trait NeedsDebug: std::fmt::Debug {}
                impl NeedsDebug for $t {}
            }};
        }

        assert_debug_impl!(Config);
        assert_debug_impl!(Decoder);
        assert_debug_impl!(DispatchStats);
        assert_debug_impl!(Dispatcher<u32>);
        assert_debug_impl!(Error);
        assert_debug_impl!(Exit);
        assert_debug_impl!(Multiplexer<u32>);
        assert_debug_impl!(Notification<u32>);
        assert_debug_impl!(Registry<u32>);
        assert_debug_impl!(StopHandle);
        assert_debug_impl!(Subscription<u32>);
    }

    #[test]
    fn std_sender_forwards_notifications() {
        let (tx, rx) = mpsc::channel::<Notification<&str>>();
        tx.process_event(Path::new("/tmp/a"), &create(), &"ctx");

        let notification = rx.try_recv().expect("notification");
        assert_eq!(
            notification,
            Notification::new("/tmp/a", create(), "ctx")
        );
        assert_eq!(
            notification.into_parts(),
            (PathBuf::from("/tmp/a"), create(), "ctx")
        );
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::sync_channel::<Notification<u32>>(1);
        drop(rx);
        tx.process_event(Path::new("/tmp/a"), &create(), &1u32);
    }

    #[test]
    fn closure_listener_sees_context() {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let listener = move |path: &Path, event: &Event, context: &u32| {
            let _ = tx
                .lock()
                .expect("sender")
                .send((path.to_owned(), event.mask(), *context));
        };
        listener.process_event(Path::new("/tmp/a"), &create(), &7);

        assert_eq!(
            rx.try_recv().expect("call"),
            (PathBuf::from("/tmp/a"), EventMask::CREATE, 7)
        );
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn tokio_sender_forwards_notifications() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification<&str>>();
        tx.process_event(Path::new("/tmp/a"), &create(), &"ctx");

        let notification = rx.recv().await.expect("notification");
        assert_eq!(notification.event(), &create());
        assert_eq!(*notification.context(), "ctx");
    }

    #[cfg(feature = "crossbeam-channel")]
    #[test]
    fn crossbeam_sender_forwards_notifications() {
        let (tx, rx) = crossbeam_channel::unbounded::<Notification<u32>>();
        tx.process_event(Path::new("/tmp/a"), &create(), &3u32);
        assert_eq!(
            rx.try_recv().expect("notification"),
            Notification::new("/tmp/a", create(), 3)
        );
    }
}
