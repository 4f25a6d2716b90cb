#![cfg(any(target_os = "linux", target_os = "android"))]

use notify_mux::{Config, Error, EventMask, Exit, Multiplexer, Notification};
use std::{
    ffi::OsStr,
    fs,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn multiplexer() -> Multiplexer<&'static str> {
    Multiplexer::new(Config::default()).expect("failed to open inotify channel")
}

fn recv(rx: &mpsc::Receiver<Notification<&'static str>>) -> Notification<&'static str> {
    rx.recv_timeout(TIMEOUT)
        .expect("did not receive expected event")
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn create_file() {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let mut mux = multiplexer();
    let (tx, rx) = mpsc::channel();
    mux.subscribe(tdir.path(), EventMask::CREATE | EventMask::DELETE, tx, "ctx")
        .expect("failed to subscribe");
    mux.start().expect("failed to start");

    fs::write(tdir.path().join("x.txt"), b"Lorem ipsum").expect("write");

    let notification = recv(&rx);
    assert_eq!(notification.path(), tdir.path());
    assert_eq!(notification.event().mask(), EventMask::CREATE);
    assert_eq!(notification.event().name(), Some(OsStr::new("x.txt")));
    assert_eq!(*notification.context(), "ctx");

    assert_eq!(mux.close().expect("close"), Some(Exit::Stopped));
}

#[test]
fn masks_gate_subscriptions_on_one_watch() {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let mut mux = multiplexer();
    let (create_tx, create_rx) = mpsc::channel();
    let (delete_tx, delete_rx) = mpsc::channel();
    let creates = mux
        .subscribe(tdir.path(), EventMask::CREATE, create_tx, "create")
        .expect("subscribe");
    let deletes = mux
        .subscribe(tdir.path(), EventMask::DELETE, delete_tx, "delete")
        .expect("subscribe");
    assert_eq!(creates.wd(), deletes.wd());
    mux.start().expect("start");

    let file = tdir.path().join("file");
    fs::write(&file, b"").expect("write");
    fs::remove_file(&file).expect("remove");

    assert_eq!(recv(&create_rx).event().mask(), EventMask::CREATE);
    assert_eq!(recv(&delete_rx).event().mask(), EventMask::DELETE);

    mux.close().expect("close");
    assert!(create_rx.try_recv().is_err());
    assert!(delete_rx.try_recv().is_err());
}

#[test]
fn deleted_directory_retires_the_watch() {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let watched = tdir.path().join("watched");
    fs::create_dir(&watched).expect("create dir");

    let mut mux = multiplexer();
    let (tx, rx) = mpsc::channel();
    mux.subscribe(&watched, EventMask::DELETE_SELF, tx, "ctx")
        .expect("subscribe");
    mux.start().expect("start");

    fs::remove_dir(&watched).expect("remove dir");

    assert!(recv(&rx).event().mask().contains(EventMask::DELETE_SELF));
    assert!(recv(&rx).event().is_ignored());
    wait_for("the watch to be purged", || mux.registry().is_empty());

    mux.close().expect("close");
}

#[test]
fn oneshot_watch_fires_once() {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let mut mux = multiplexer();
    let (tx, rx) = mpsc::channel();
    let sub = mux
        .subscribe(
            tdir.path(),
            EventMask::CREATE | EventMask::ONESHOT,
            tx,
            "ctx",
        )
        .expect("subscribe");
    mux.start().expect("start");

    fs::write(tdir.path().join("first"), b"").expect("write");
    assert_eq!(recv(&rx).event().name(), Some(OsStr::new("first")));
    assert!(recv(&rx).event().is_ignored());
    wait_for("the watch to be purged", || !mux.registry().contains(&sub));

    fs::write(tdir.path().join("second"), b"").expect("write");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(matches!(
        mux.cancel(&sub),
        Err(Error::AlreadyCancelled { .. })
    ));

    mux.close().expect("close");
}

fn oneshot_beside_plain_subscription(oneshot_first: bool) {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let mut mux = multiplexer();
    let (once_tx, once_rx) = mpsc::channel();
    let (plain_tx, plain_rx) = mpsc::channel();
    let once_mask = EventMask::CREATE | EventMask::ONESHOT;

    let (once, plain) = if oneshot_first {
        let once = mux
            .subscribe(tdir.path(), once_mask, once_tx, "once")
            .expect("subscribe");
        let plain = mux
            .subscribe(tdir.path(), EventMask::CREATE, plain_tx, "plain")
            .expect("subscribe");
        (once, plain)
    } else {
        let plain = mux
            .subscribe(tdir.path(), EventMask::CREATE, plain_tx, "plain")
            .expect("subscribe");
        let once = mux
            .subscribe(tdir.path(), once_mask, once_tx, "once")
            .expect("subscribe");
        (once, plain)
    };
    assert_eq!(once.wd(), plain.wd());
    mux.start().expect("start");

    fs::write(tdir.path().join("first"), b"").expect("write");
    assert_eq!(recv(&once_rx).event().name(), Some(OsStr::new("first")));
    assert!(recv(&once_rx).event().is_ignored());
    assert_eq!(recv(&plain_rx).event().name(), Some(OsStr::new("first")));

    fs::write(tdir.path().join("second"), b"").expect("write");
    assert_eq!(recv(&plain_rx).event().name(), Some(OsStr::new("second")));
    assert!(once_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(mux.registry().contains(&plain));
    assert!(!mux.registry().contains(&once));

    mux.close().expect("close");
}

#[test]
fn oneshot_then_plain_subscription() {
    oneshot_beside_plain_subscription(true);
}

#[test]
fn plain_then_oneshot_subscription() {
    oneshot_beside_plain_subscription(false);
}

#[test]
fn cancelled_subscription_receives_nothing() {
    let tdir = tempfile::tempdir().expect("failed to create temporary directory");
    let mut mux = multiplexer();
    let (tx, rx) = mpsc::channel();
    let sub = mux
        .subscribe(tdir.path(), EventMask::CREATE, tx, "ctx")
        .expect("subscribe");
    mux.start().expect("start");

    mux.cancel(&sub).expect("cancel");
    assert!(mux.registry().is_empty());

    fs::write(tdir.path().join("file"), b"").expect("write");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    mux.close().expect("close");
}

#[test]
fn missing_path_is_reported() {
    let mux = multiplexer();
    let (tx, _rx) = mpsc::channel::<Notification<&str>>();
    let err = mux
        .subscribe("/some/non/existant/path", EventMask::CREATE, tx, "ctx")
        .expect_err("subscribing a missing path must fail");
    assert!(err.is_path_not_found(), "unexpected error: {err}");
}

#[test]
fn close_stops_a_blocked_loop() {
    let mut mux = multiplexer();
    mux.start().expect("start");
    thread::sleep(Duration::from_millis(50));
    assert!(mux.is_running());
    assert_eq!(mux.close().expect("close"), Some(Exit::Stopped));
}
