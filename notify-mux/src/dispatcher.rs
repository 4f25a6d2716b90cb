//! The decode and dispatch loop.
//!
//! One [`Dispatcher`] is the only reader of its channel. Each iteration blocks in one
//! [`Channel::read_raw`], decodes every complete record now buffered, and hands each record to
//! the subscriptions registered on its watch. Listeners run synchronously on the loop's thread,
//! so a slow listener delays every later event on every watch; use one of the channel sender
//! listeners to move work elsewhere.

use crate::{
    channel::Channel,
    decoder::{Decoder, HexDump},
    registry::{Registry, Subscription},
    Config, Error, Result,
};
use notify_mux_types::{event::Event, mask::EventMask};
use std::{
    any::Any,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Why a dispatch loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exit {
    /// A [`StopHandle`] asked the loop to stop.
    Stopped,
    /// The channel reported end of stream.
    Closed,
}

/// Asks a running dispatch loop to stop.
///
/// The loop checks the flag before every read and again after every read, before decoding what
/// it just received. Records still buffered at that point are left undecoded.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    channel: Arc<dyn Channel>,
}

impl StopHandle {
    fn new(channel: Arc<dyn Channel>) -> Self {
        StopHandle {
            flag: Arc::new(AtomicBool::new(false)),
            channel,
        }
    }

    /// Sets the stop flag and wakes the loop if it is blocked in a read.
    pub fn stop(&self) -> Result<()> {
        self.flag.store(true, Ordering::Release);
        self.channel.wake().map_err(Error::channel)
    }

    /// Indicates whether [`StopHandle::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Receives queue overflow records.
///
/// An overflow means the kernel dropped events; it belongs to no watch and is never handed to a
/// subscription.
pub trait OverflowHandler: Send + 'static {
    /// Handles one overflow record.
    fn handle_overflow(&mut self, event: &Event);
}

impl<F> OverflowHandler for F
where
    F: FnMut(&Event) + Send + 'static,
{
    fn handle_overflow(&mut self, event: &Event) {
        (self)(event);
    }
}

/// Default overflow handler: logs a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOverflow;

impl OverflowHandler for LogOverflow {
    fn handle_overflow(&mut self, _event: &Event) {
        log::warn!("inotify event queue overflowed, events were lost");
    }
}

/// Counters kept by a [`Dispatcher`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Successful, non-empty reads.
    pub reads: u64,
    /// Bytes read.
    pub bytes: u64,
    /// Records decoded, overflow records included.
    pub events: u64,
    /// Registry lookups, one per record that is not an overflow.
    pub lookups: u64,
    /// Listener invocations that returned normally.
    pub deliveries: u64,
    /// Overflow records.
    pub overflows: u64,
    /// Listener invocations that panicked.
    pub listener_failures: u64,
    /// Watches purged after the kernel retired them.
    pub purged_watches: u64,
    /// One-shot subscriptions cancelled after their event.
    pub retired_oneshots: u64,
}

/// Decode and dispatch loop over one channel.
pub struct Dispatcher<C> {
    channel: Arc<dyn Channel>,
    registry: Registry<C>,
    decoder: Decoder,
    overflow: Box<dyn OverflowHandler>,
    stop: StopHandle,
    stats: DispatchStats,
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("decoder", &self.decoder)
            .field("stop", &self.stop)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<C: 'static> Dispatcher<C> {
    /// Creates a dispatcher reading from the registry's channel.
    ///
    /// `config` is expected to be valid, see [`Config::validate`].
    pub fn new(registry: Registry<C>, config: &Config) -> Self {
        let channel = Arc::clone(registry.channel());
        Dispatcher {
            stop: StopHandle::new(Arc::clone(&channel)),
            channel,
            registry,
            decoder: Decoder::new(config),
            overflow: Box::new(LogOverflow),
            stats: DispatchStats::default(),
        }
    }

    /// Replaces the overflow handler.
    pub fn with_overflow_handler<H: OverflowHandler>(mut self, handler: H) -> Self {
        self.overflow = Box::new(handler);
        self
    }

    /// Replaces the overflow handler with an already boxed one.
    pub fn with_boxed_overflow_handler(mut self, handler: Box<dyn OverflowHandler>) -> Self {
        self.overflow = handler;
        self
    }

    /// Handle stopping this loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Counters so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// The decode buffer.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// The registry subscriptions are looked up in.
    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// Runs until stopped, until the channel closes, or until a fatal error.
    ///
    /// Fatal errors are [`Error::MalformedEventStream`] and [`Error::ChannelError`].
    pub fn run(&mut self) -> Result<Exit> {
        log::debug!("dispatch loop started");
        loop {
            match self.run_once() {
                Ok(None) => continue,
                Ok(Some(exit)) => {
                    log::debug!("dispatch loop exited: {exit:?}");
                    return Ok(exit);
                }
                Err(e) => {
                    log::error!("dispatch loop failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// One iteration: one read, then every complete record it made available.
    ///
    /// Returns `Ok(None)` when the loop should go on, including after a read interrupted by
    /// [`Channel::wake`].
    pub fn run_once(&mut self) -> Result<Option<Exit>> {
        if self.stop.is_stopped() {
            return Ok(Some(Exit::Stopped));
        }

        let spare = self.decoder.spare();
        let n = match self.channel.read_raw(spare) {
            Ok(0) => return Ok(Some(Exit::Closed)),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                return Ok(None)
            }
            Err(e) => return Err(Error::channel(e)),
        };
        log::trace!("read {n} bytes:\n{}", HexDump(&spare[..n]));
        self.decoder.commit(n);
        self.stats.reads += 1;
        self.stats.bytes += n as u64;

        if self.stop.is_stopped() {
            return Ok(Some(Exit::Stopped));
        }

        self.process_buffered()?;
        Ok(None)
    }

    /// Decodes and dispatches every complete record in the buffer, then compacts it.
    ///
    /// Returns the number of records dispatched.
    pub fn process_buffered(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(event) = self.decoder.next_event()? {
            self.dispatch(&event);
            count += 1;
        }
        self.decoder.compact();
        Ok(count)
    }

    /// Routes one decoded record.
    ///
    /// Overflow records go to the overflow handler only. Any other record goes to every
    /// subscription on its watch whose mask matches, in registration order; a retired watch is
    /// purged once they have all seen the record.
    ///
    /// A one-shot subscription is cancelled right after its first record and then sees an
    /// `IGNORED` record of its own, whether or not others still share the watch.
    pub fn dispatch(&mut self, event: &Event) {
        log::trace!("inotify event: {event:?}");
        self.stats.events += 1;

        if event.is_overflow() {
            self.stats.overflows += 1;
            self.overflow.handle_overflow(event);
            return;
        }

        self.stats.lookups += 1;
        let subscriptions = self.registry.lookup(event.wd());
        if subscriptions.is_empty() {
            log::debug!("event for unknown watch {}: {event:?}", event.wd());
        }

        for subscription in subscriptions.iter().filter(|sub| sub.wants(event)) {
            self.deliver(subscription, event);
            if subscription.is_oneshot() && !event.is_ignored() {
                self.retire(subscription, event);
            }
        }

        if event.is_ignored() && !self.registry.purge(event.wd()).is_empty() {
            self.stats.purged_watches += 1;
        }
    }

    fn deliver(&mut self, subscription: &Subscription<C>, event: &Event) {
        match panic::catch_unwind(AssertUnwindSafe(|| subscription.deliver(event))) {
            Ok(()) => self.stats.deliveries += 1,
            Err(payload) => {
                self.stats.listener_failures += 1;
                let err = Error::ListenerFailure {
                    path: subscription.path().to_owned(),
                    message: panic_message(payload.as_ref()),
                };
                log::error!("{err}");
            }
        }
    }

    fn retire(&mut self, subscription: &Subscription<C>, event: &Event) {
        // already gone if it was cancelled from a listener
        if self.registry.cancel(subscription).is_err() {
            return;
        }
        log::trace!(
            "one-shot subscription {} on watch {} retired",
            subscription.id(),
            event.wd()
        );
        self.stats.retired_oneshots += 1;
        self.deliver(subscription, &Event::new(event.wd(), EventMask::IGNORED));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_owned()
    }
}
