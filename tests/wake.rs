//! Wake primitive and cross-thread control of a blocking loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rivet::poll::{self, Interest};
use rivet::wake::Waker;
use rivet::{Config, EventLoop};

#[test]
fn wake_makes_descriptor_readable() {
    let waker = Waker::new().unwrap();
    let mut p = poll::create(&Config {
        max_peers: 256,
        ..Config::default()
    })
    .unwrap();
    p.add(waker.fd(), Interest::READ).unwrap();

    assert_eq!(p.wait(0).unwrap(), 0);

    waker.wake();
    waker.wake();
    let n = p.wait(1_000).unwrap();
    assert!(n >= 1);
    assert!(p.fired().iter().any(|f| f.fd == waker.fd() && f.interest.read));

    // Draining clears readiness even after coalesced wakes.
    waker.consume();
    assert_eq!(p.wait(0).unwrap(), 0);
}

#[test]
fn stop_unblocks_a_long_wait() {
    // A wait long enough that only the wake descriptor can end it.
    let mut el = EventLoop::new(Config {
        poll_timeout_ms: 30_000,
        ..Config::default()
    })
    .unwrap();
    let handle = el.handle();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    });

    let started = Instant::now();
    el.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "stop did not interrupt the wait");
    stopper.join().unwrap();
}

#[test]
fn stop_on_the_loop_owner_is_observed_by_run() {
    let mut el = EventLoop::new(Config {
        poll_timeout_ms: 30_000,
        ..Config::default()
    })
    .unwrap();

    // The owning thread can request a stop without minting a handle.
    el.stop();

    let started = Instant::now();
    el.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn callback_injected_from_another_thread() {
    let mut el = EventLoop::new(Config {
        poll_timeout_ms: 30_000,
        ..Config::default()
    })
    .unwrap();
    let handle = el.handle();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let injector = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let inner = handle.clone();
        handle.add_callback(move || {
            flag.store(true, Ordering::SeqCst);
            inner.stop();
        });
    });

    el.run().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    injector.join().unwrap();
}
