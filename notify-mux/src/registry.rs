//! Watch registry: which subscriptions share which kernel watch.
//!
//! Every live [`WatchId`] maps to a non-empty, insertion-ordered list of subscriptions and the
//! mask last installed for it. The map is guarded by a single lock that is also held across the
//! kernel calls of `subscribe` and `cancel`, so a watch is never observed half added or half
//! removed. Listeners are never run under that lock: [`Registry::lookup`] hands out a snapshot.
//!
//! # Option bits on shared watches
//!
//! The kernel keeps one mask per watch, so per subscription options are folded as follows:
//!
//! - `ONESHOT` is never installed. The dispatcher retires a one-shot subscription after its first
//!   event, which removes the watch only if nobody else is left on it.
//! - `EXCL_UNLINK` is installed only while every subscription on the watch asked for it.
//! - `ONLYDIR` and `DONT_FOLLOW` only affect how the path is resolved, and are passed along with
//!   the calls of the `subscribe` that carries them.
//! - `MASK_ADD` is implied: a watch is never narrowed by `subscribe`.

use crate::{channel::Channel, Error, Listener, Result};
use notify_mux_types::{
    event::{Event, WatchId},
    mask::EventMask,
};
use std::{
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

struct Inner<C> {
    id: u64,
    wd: WatchId,
    path: PathBuf,
    mask: EventMask,
    listener: Box<dyn Listener<C>>,
    context: C,
}

/// One observer's interest in one watch.
///
/// Handles are cheap to clone; all clones refer to the same subscription.
pub struct Subscription<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Subscription<C> {
    fn new(
        wd: WatchId,
        path: PathBuf,
        mask: EventMask,
        listener: Box<dyn Listener<C>>,
        context: C,
    ) -> Self {
        Subscription {
            inner: Arc::new(Inner {
                id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
                wd,
                path,
                mask,
                listener,
                context,
            }),
        }
    }

    /// Process-unique identifier of this subscription.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Watch the subscription is registered on.
    pub fn wd(&self) -> WatchId {
        self.inner.wd
    }

    /// Path as given to `subscribe`.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Interest mask as given to `subscribe`.
    pub fn mask(&self) -> EventMask {
        self.inner.mask
    }

    /// Caller supplied context handed back on every callback.
    pub fn context(&self) -> &C {
        &self.inner.context
    }

    /// Whether this subscription is to be told about `event`.
    ///
    /// Event bits are matched against the interest mask. Unmount and watch removal are delivered
    /// to everyone, the kernel reports them whatever the mask.
    pub fn wants(&self, event: &Event) -> bool {
        self.mask().events().intersects(event.mask().events())
            || event
                .mask()
                .intersects(EventMask::UNMOUNT | EventMask::IGNORED)
    }

    /// Whether the subscription ends after its first event.
    pub fn is_oneshot(&self) -> bool {
        self.mask().is_oneshot()
    }
}

impl<C: 'static> Subscription<C> {
    pub(crate) fn deliver(&self, event: &Event) {
        self.inner
            .listener
            .process_event(&self.inner.path, event, &self.inner.context);
    }
}

impl<C> Clone for Subscription<C> {
    fn clone(&self) -> Self {
        Subscription {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> PartialEq for Subscription<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<C> Eq for Subscription<C> {}

impl<C> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("wd", &self.wd())
            .field("path", &self.path())
            .field("mask", &self.mask())
            .finish_non_exhaustive()
    }
}

struct Watch<C> {
    // as installed in the kernel, path resolution flags excluded
    mask: EventMask,
    subscriptions: Vec<Subscription<C>>,
}

type WatchMap<C> = BTreeMap<WatchId, Watch<C>>;

const RESOLUTION: EventMask = EventMask::ONLYDIR.union(EventMask::DONT_FOLLOW);

/// Mask a watch needs to serve subscriptions with the given masks.
fn watch_mask(masks: impl IntoIterator<Item = EventMask>) -> EventMask {
    let mut events = EventMask::empty();
    let mut exclude_unlinked = None;
    for mask in masks {
        events |= mask.events();
        exclude_unlinked =
            Some(exclude_unlinked.unwrap_or(true) && mask.contains(EventMask::EXCL_UNLINK));
    }
    match exclude_unlinked {
        Some(true) => events | EventMask::EXCL_UNLINK,
        _ => events,
    }
}

/// Shared map from watch identifier to the subscriptions on it
pub struct Registry<C> {
    channel: Arc<dyn Channel>,
    watches: Arc<Mutex<WatchMap<C>>>,
}

impl<C> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Registry {
            channel: Arc::clone(&self.channel),
            watches: Arc::clone(&self.watches),
        }
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let watches = self.lock();
        f.debug_map()
            .entries(
                watches
                    .iter()
                    .map(|(wd, watch)| (wd, watch.subscriptions.len())),
            )
            .finish()
    }
}

impl<C> Registry<C> {
    /// Creates an empty registry installing watches through `channel`.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Registry {
            channel,
            watches: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The channel watches are installed on.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    // Listeners never run under this lock, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, WatchMap<C>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `listener` for the events in `mask` on `path`.
    ///
    /// The events handed to the kernel are the union of this mask and those of the live
    /// subscriptions sharing the watch, so adding an observer never narrows what earlier ones
    /// receive. Each subscription is still only notified of the events in its own mask. See the
    /// [module documentation](self) for how option bits are combined.
    pub fn subscribe<P, L>(
        &self,
        path: P,
        mask: EventMask,
        listener: L,
        context: C,
    ) -> Result<Subscription<C>>
    where
        P: Into<PathBuf>,
        L: Listener<C>,
    {
        let path = path.into();
        let resolution = mask & RESOLUTION;
        let mut watches = self.lock();

        let wanted = watch_mask(
            watches
                .values()
                .flat_map(|watch| &watch.subscriptions)
                .filter(|sub| sub.path() == path)
                .map(Subscription::mask)
                .chain(Some(mask)),
        );
        let wd = self.add_watch(&path, wanted | resolution | EventMask::MASK_ADD)?;

        // Another path may name the same inode, or an option has to be dropped.
        let mut installed = wanted;
        if let Some(watch) = watches.get_mut(&wd) {
            installed = watch.mask | wanted;
            watch.mask = installed;
            let needed = watch_mask(
                watch
                    .subscriptions
                    .iter()
                    .map(Subscription::mask)
                    .chain(Some(mask)),
            );
            let target = installed.events() | needed;
            if target != installed {
                self.add_watch(&path, target | resolution)?;
                installed = target;
            }
        }

        let subscription = Subscription::new(wd, path, mask, Box::new(listener), context);
        log::trace!(
            "subscription {} on watch {wd} for {} ({mask:?}), kernel mask {installed:?}",
            subscription.id(),
            subscription.path().display()
        );
        let watch = watches.entry(wd).or_insert_with(|| Watch {
            mask: installed,
            subscriptions: Vec::new(),
        });
        watch.mask = installed;
        watch.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    fn add_watch(&self, path: &Path, mask: EventMask) -> Result<WatchId> {
        self.channel.add_watch(path, mask).map_err(|e| {
            if e.kind() == io::ErrorKind::NotConnected {
                Error::ChannelClosed
            } else {
                Error::watch_creation(path, e)
            }
        })
    }

    /// Cancels a subscription, removing the kernel watch with the last one.
    ///
    /// Fails with [`Error::AlreadyCancelled`] if the subscription was cancelled before or its
    /// watch has been retired by the kernel. A failing `remove_watch` is logged and otherwise
    /// ignored: the mapping is dropped either way.
    pub fn cancel(&self, subscription: &Subscription<C>) -> Result<()> {
        let wd = subscription.wd();
        let mut watches = self.lock();

        let now_empty = {
            let subs = &mut watches
                .get_mut(&wd)
                .ok_or(Error::AlreadyCancelled { wd })?
                .subscriptions;
            let index = subs
                .iter()
                .position(|sub| sub == subscription)
                .ok_or(Error::AlreadyCancelled { wd })?;
            subs.remove(index);
            subs.is_empty()
        };

        log::trace!("cancelled subscription {} on watch {wd}", subscription.id());

        if now_empty {
            watches.remove(&wd);
            if let Err(e) = self.channel.remove_watch(wd) {
                log::warn!("removing watch {wd} failed, dropping it anyway: {e}");
            }
        }
        Ok(())
    }

    /// Snapshot of the subscriptions on `wd`, in registration order.
    ///
    /// Unknown identifiers yield an empty list: events can still arrive for a watch cancelled a
    /// moment ago.
    pub fn lookup(&self, wd: WatchId) -> Vec<Subscription<C>> {
        self.lock()
            .get(&wd)
            .map(|watch| watch.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Mask installed for `wd`, or `None` if the watch is not live.
    ///
    /// Path resolution flags are not part of it, and `ONESHOT` never is.
    pub fn watch_mask(&self, wd: WatchId) -> Option<EventMask> {
        self.lock().get(&wd).map(|watch| watch.mask)
    }

    /// Drops the mapping of a watch the kernel has retired, without calling `remove_watch`.
    ///
    /// Returns the subscriptions that were still registered on it.
    pub fn purge(&self, wd: WatchId) -> Vec<Subscription<C>> {
        let purged = self
            .lock()
            .remove(&wd)
            .map(|watch| watch.subscriptions)
            .unwrap_or_default();
        if !purged.is_empty() {
            log::trace!("purged watch {wd} with {} subscription(s)", purged.len());
        }
        purged
    }

    /// Drops every mapping without kernel calls, for use once the channel is closed.
    ///
    /// Returns the number of watches dropped.
    pub fn clear(&self) -> usize {
        let mut watches = self.lock();
        let count = watches.len();
        watches.clear();
        count
    }

    /// Whether `subscription` is still registered.
    pub fn contains(&self, subscription: &Subscription<C>) -> bool {
        self.lock()
            .get(&subscription.wd())
            .is_some_and(|watch| watch.subscriptions.contains(subscription))
    }

    /// Number of live watches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no watch is live.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live watch identifiers in ascending order.
    pub fn watch_ids(&self) -> Vec<WatchId> {
        self.lock().keys().copied().collect()
    }

    /// Number of live subscriptions across all watches.
    pub fn subscription_count(&self) -> usize {
        self.lock()
            .values()
            .map(|watch| watch.subscriptions.len())
            .sum()
    }
}
