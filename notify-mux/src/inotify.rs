//! Channel implementation for the inotify Linux API
//!
//! The inotify API provides a mechanism for monitoring filesystem events.  Inotify can be used to
//! monitor individual files, or to monitor directories.  When a directory is monitored, inotify
//! will return events for the directory itself, and for files inside the directory.
//!
//! The descriptor is opened non-blocking and registered with a `mio::Poll`, next to a
//! `mio::Waker` used to interrupt a blocked read when the dispatch loop has to stop.

use crate::{channel::Channel, Config, Error, Result};
use inotify::{Inotify, WatchDescriptor, WatchMask};
use notify_mux_types::{event::WatchId, mask::EventMask};
use std::{
    collections::HashMap,
    fmt,
    fs::File,
    io::{self, Read},
    os::unix::io::{AsFd, AsRawFd, RawFd},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError, RwLock,
    },
};

const INOTIFY: mio::Token = mio::Token(0);
const MESSAGE: mio::Token = mio::Token(1);

/// Notification channel backed by an inotify descriptor
pub struct InotifyChannel {
    inotify: RwLock<Option<Open>>,
    descriptors: Mutex<HashMap<WatchId, WatchDescriptor>>,
    poll: Mutex<mio::Poll>,
    registry: mio::Registry,
    waker: mio::Waker,
    closed: AtomicBool,
}

impl fmt::Debug for InotifyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InotifyChannel")
            .field("watches", &self.descriptors().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct Open {
    inotify: Inotify,
    // `Inotify::read_events` parses records itself; the decoder wants the raw bytes.
    reader: File,
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "inotify channel is closed")
}

// `Inotify::init` always opens the descriptor with close-on-exec set.
fn inherit_across_exec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain system calls on a descriptor owned by the caller.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl InotifyChannel {
    /// Opens a new inotify instance.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let inotify = Inotify::init().map_err(Error::channel)?;
        let raw = inotify.as_raw_fd();
        if !config.close_on_exec() {
            inherit_across_exec(raw).map_err(Error::channel)?;
        }
        let reader = File::from(inotify.as_fd().try_clone_to_owned()?);

        let poll = mio::Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = mio::Waker::new(poll.registry(), MESSAGE)?;
        registry.register(
            &mut mio::unix::SourceFd(&raw),
            INOTIFY,
            mio::Interest::READABLE,
        )?;

        log::debug!("opened inotify channel on fd {raw}");

        Ok(InotifyChannel {
            inotify: RwLock::new(Some(Open { inotify, reader })),
            descriptors: Mutex::new(HashMap::new()),
            poll: Mutex::new(poll),
            registry,
            waker,
            closed: AtomicBool::new(false),
        })
    }

    /// Indicates whether [`Channel::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn descriptors(&self) -> MutexGuard<'_, HashMap<WatchId, WatchDescriptor>> {
        self.descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let guard = self.inotify.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(open) => (&open.reader).read(buf),
            None => Ok(0),
        }
    }
}

impl Channel for InotifyChannel {
    fn add_watch(&self, path: &Path, mask: EventMask) -> io::Result<WatchId> {
        let guard = self.inotify.read().unwrap_or_else(PoisonError::into_inner);
        let inotify = &guard.as_ref().ok_or_else(closed_error)?.inotify;

        log::trace!("adding inotify watch: {} ({mask:?})", path.display());

        let descriptor = inotify
            .watches()
            .add(path, WatchMask::from_bits_retain(mask.bits()))?;
        let wd = WatchId::new(descriptor.get_watch_descriptor_id());
        self.descriptors().insert(wd, descriptor);
        Ok(wd)
    }

    fn remove_watch(&self, wd: WatchId) -> io::Result<()> {
        let guard = self.inotify.read().unwrap_or_else(PoisonError::into_inner);
        let inotify = &guard.as_ref().ok_or_else(closed_error)?.inotify;
        let descriptor = self.descriptors().remove(&wd).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("unknown watch {wd}"))
        })?;

        log::trace!("removing inotify watch: {wd}");

        inotify.watches().remove(descriptor)
    }

    fn read_raw(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut poll = self.poll.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events = mio::Events::with_capacity(4);
        loop {
            if self.is_closed() {
                return Ok(0);
            }

            // The registration is edge triggered: drain before waiting again.
            match self.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            match poll.poll(&mut events, None) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            if events.iter().any(|event| event.token() == MESSAGE) {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
        }
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let open = self
            .inotify
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.descriptors().clear();

        let mut closed = Ok(());
        if let Some(Open { inotify, reader }) = open {
            drop(reader);
            let raw = inotify.as_raw_fd();
            if let Err(e) = self.registry.deregister(&mut mio::unix::SourceFd(&raw)) {
                log::debug!("deregistering inotify fd {raw} failed: {e}");
            }
            log::debug!("closing inotify channel on fd {raw}");
            closed = inotify.close();
        }

        // let a reader blocked in poll observe the closed flag
        self.waker.wake()?;
        closed
    }
}

impl Drop for InotifyChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
