use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, Exit, OverflowHandler, StopHandle},
    registry::{Registry, Subscription},
    Config, Error, Listener, Result,
};
use notify_mux_types::mask::EventMask;
use std::{
    fmt, io,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

const THREAD_NAME: &str = "notify-mux dispatch loop";

struct Running {
    stop: StopHandle,
    thread: JoinHandle<Result<Exit>>,
}

impl Running {
    fn join(self) -> Result<Exit> {
        if let Err(e) = self.stop.stop() {
            log::warn!("waking the dispatch loop failed: {e}");
        }
        self.thread
            .join()
            .unwrap_or_else(|_| Err(Error::channel(io::Error::other("dispatch loop panicked"))))
    }
}

/// Owner of a notification channel, its registry and its dispatch thread.
///
/// The channel is released by [`Multiplexer::close`], or when the multiplexer is dropped.
/// Either way the dispatch thread is stopped and joined first, and the registry is cleared:
/// its watches died with the descriptor.
pub struct Multiplexer<C> {
    config: Config,
    registry: Registry<C>,
    overflow: Option<Box<dyn OverflowHandler>>,
    running: Option<Running>,
    closed: bool,
}

impl<C> fmt::Debug for Multiplexer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("running", &self.running.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: Send + Sync + 'static> Multiplexer<C> {
    /// Opens an inotify channel configured by `config`.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn new(config: Config) -> Result<Self> {
        let channel = crate::inotify::InotifyChannel::open(&config)?;
        Self::with_channel(Arc::new(channel), config)
    }

    /// Multiplexes an already opened channel.
    pub fn with_channel(channel: Arc<dyn Channel>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Multiplexer {
            config,
            registry: Registry::new(channel),
            overflow: None,
            running: None,
            closed: false,
        })
    }

    /// Replaces the handler queue overflows are reported to.
    ///
    /// Only affects dispatch loops created afterwards.
    pub fn with_overflow_handler<H: OverflowHandler>(mut self, handler: H) -> Self {
        self.overflow = Some(Box::new(handler));
        self
    }

    /// The configuration the channel was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared registry.
    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// See [`Registry::subscribe`].
    ///
    /// Fails with [`Error::ChannelClosed`] if the channel was closed underneath the multiplexer,
    /// through [`Registry::channel`].
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
        self.registry.subscribe(path, mask, listener, context)
    }

    /// See [`Registry::cancel`].
    pub fn cancel(&self, subscription: &Subscription<C>) -> Result<()> {
        self.registry.cancel(subscription)
    }

    /// Creates a dispatch loop for callers that run it on a thread of their own.
    ///
    /// The overflow handler moves to the returned dispatcher. [`Multiplexer::close`] does not
    /// stop such a loop directly: it closes the channel, after which the loop exits with
    /// [`Exit::Closed`].
    pub fn dispatcher(&mut self) -> Dispatcher<C> {
        let dispatcher = Dispatcher::new(self.registry.clone(), &self.config);
        match self.overflow.take() {
            Some(handler) => dispatcher.with_boxed_overflow_handler(handler),
            None => dispatcher,
        }
    }

    /// Spawns the dispatch loop on its own thread.
    ///
    /// Does nothing if the loop is already running. On a channel closed through
    /// [`Registry::channel`] the loop ends right away with [`Exit::Closed`].
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut dispatcher = self.dispatcher();
        let stop = dispatcher.stop_handle();
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || dispatcher.run())?;

        self.running = Some(Running { stop, thread });
        Ok(())
    }

    /// Indicates whether the dispatch thread is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.thread.is_finished())
    }

    /// Stops and joins the dispatch thread, then releases the channel.
    ///
    /// Returns how the loop ended, or `None` if it was never started. An error the loop ended
    /// with is returned after the channel has been released.
    pub fn close(mut self) -> Result<Option<Exit>> {
        self.shutdown()
    }
}

impl<C> Multiplexer<C> {
    fn shutdown(&mut self) -> Result<Option<Exit>> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;

        let exit = self.running.take().map(Running::join).transpose();
        let dropped = self.registry.clear();
        let closed = self.registry.channel().close();
        log::debug!("multiplexer closed, {dropped} watch(es) dropped");

        let exit = exit?;
        closed.map_err(Error::channel)?;
        Ok(exit)
    }
}

impl<C> Drop for Multiplexer<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("closing multiplexer failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::*, Event, Notification};
    use pretty_assertions::assert_eq;
    use std::{
        ffi::OsStr,
        path::Path,
        sync::{mpsc, Mutex},
        time::{Duration, Instant},
    };

    fn mux() -> (Multiplexer<u32>, Arc<ScriptedChannel>) {
        let channel = ScriptedChannel::new();
        let mux = Multiplexer::with_channel(channel.clone(), Config::default()).expect("mux");
        (mux, channel)
    }

    // The scripted channel reports end of stream once its script is used up.
    fn wait_for_loop_exit<C: Send + Sync + 'static>(mux: &Multiplexer<C>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while mux.is_running() {
            assert!(Instant::now() < deadline, "dispatch loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn multiplexer_is_send() {
        fn check<T: Send>() {}
        check::<Multiplexer<String>>();
    }

    #[test]
    fn events_are_dispatched_on_the_loop_thread() {
        let (mut mux, channel) = mux();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sub = mux
            .subscribe(
                "/tmp/a",
                EventMask::CREATE,
                move |_: &Path, event: &Event, context: &u32| {
                    let thread = thread::current().name().map(str::to_owned);
                    let _ = tx
                        .lock()
                        .expect("sender")
                        .send((thread, event.name().map(OsStr::to_owned), *context));
                },
                5,
            )
            .expect("subscribe");
        channel.push_read(record(sub.wd().get(), EventMask::CREATE, 0, Some("x.txt")));

        mux.start().expect("start");
        wait_for_loop_exit(&mux);
        assert_eq!(mux.close().expect("close"), Some(Exit::Closed));

        assert_eq!(
            rx.try_recv().expect("delivery"),
            (
                Some(THREAD_NAME.to_owned()),
                Some(OsStr::new("x.txt").to_owned()),
                5
            )
        );
        assert!(channel.is_closed());
    }

    #[test]
    fn close_without_start_releases_channel() {
        let (mux, channel) = mux();
        let registry = mux.registry().clone();
        let (tx, _rx) = recorder();
        mux.subscribe("/tmp/a", EventMask::CREATE, tx, 1)
            .expect("subscribe");

        assert_eq!(mux.close().expect("close"), None);
        assert!(channel.is_closed());
        assert!(registry.is_empty());
        assert_eq!(channel.removed(), vec![]);
    }

    #[test]
    fn drop_releases_channel() {
        let (mut mux, channel) = mux();
        mux.start().expect("start");
        drop(mux);
        assert!(channel.is_closed());
    }

    #[test]
    fn subscribe_after_close_fails() {
        let (mux, _channel) = mux();
        let registry = mux.registry().clone();
        mux.close().expect("close");

        let (tx, _rx) = recorder();
        assert!(matches!(
            registry.subscribe("/tmp/a", EventMask::CREATE, tx, 1),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn channel_closed_underneath_is_reported() {
        let (mut mux, channel) = mux();
        mux.registry().channel().close().expect("close channel");

        let (tx, _rx) = recorder();
        assert!(matches!(
            mux.subscribe("/tmp/a", EventMask::CREATE, tx, 1),
            Err(Error::ChannelClosed)
        ));
        assert!(mux.registry().is_empty());

        mux.start().expect("start");
        wait_for_loop_exit(&mux);
        assert_eq!(mux.close().expect("close"), Some(Exit::Closed));
        assert_eq!(channel.reads(), 0);
    }

    #[test]
    fn dropping_a_full_sync_receiver_releases_close() {
        let (mut mux, channel) = mux();
        let (tx, rx) = mpsc::sync_channel::<Notification<u32>>(1);
        let sub = mux
            .subscribe("/tmp/a", EventMask::CREATE, tx, 1)
            .expect("subscribe");
        let wd = sub.wd().get();
        let mut bytes = record(wd, EventMask::CREATE, 0, Some("one"));
        bytes.extend(record(wd, EventMask::CREATE, 0, Some("two")));
        bytes.extend(record(wd, EventMask::CREATE, 0, Some("three")));
        channel.push_read(bytes);

        mux.start().expect("start");
        let first = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("first notification");
        assert_eq!(first.event().name(), Some(OsStr::new("one")));

        // the loop is blocked on a full channel until the receiver goes away
        drop(rx);
        assert!(matches!(mux.close(), Ok(Some(_))));
        assert!(channel.is_closed());
    }

    #[test]
    fn overflow_handler_is_used_by_the_loop() {
        let (mux, channel) = mux();
        let (tx, rx) = mpsc::channel();
        let mut mux = mux.with_overflow_handler(move |event: &Event| {
            let _ = tx.send(event.clone());
        });
        channel.push_read(record(-1, EventMask::Q_OVERFLOW, 0, None));

        mux.start().expect("start");
        wait_for_loop_exit(&mux);
        mux.close().expect("close");

        assert_eq!(rx.try_recv().expect("overflow"), Event::overflow());
    }

    #[test]
    fn loop_errors_are_returned_by_close() {
        let (mut mux, channel) = mux();
        channel.push_error(io::ErrorKind::PermissionDenied);

        mux.start().expect("start");
        wait_for_loop_exit(&mux);
        assert!(matches!(mux.close(), Err(Error::ChannelError(_))));
        assert!(channel.is_closed());
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let (mut mux, _channel) = mux();
        mux.start().expect("start");
        mux.start().expect("second start");
        wait_for_loop_exit(&mux);
        assert_eq!(mux.close().expect("close"), Some(Exit::Closed));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let channel = ScriptedChannel::new();
        let result =
            Multiplexer::<u32>::with_channel(channel, Config::default().with_max_name_len(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
