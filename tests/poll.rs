//! Multiplexer backend behavior, exercised over real pipes.

mod common;

use std::os::unix::io::RawFd;

use rivet::config::Config;
use rivet::error::Error;
use rivet::poll::{self, Interest, Poll};

use common::{pipe_pair, PipeEnd};

fn small_config() -> Config {
    Config {
        max_peers: 256,
        wait_capacity: 64,
        ..Config::default()
    }
}

fn write_byte(fd: RawFd) {
    let byte = [1u8];
    let n = unsafe { libc::write(fd, byte.as_ptr() as *const _, 1) };
    assert_eq!(n, 1);
}

fn fired_for(p: &dyn Poll, fd: RawFd) -> Option<Interest> {
    p.fired().iter().find(|f| f.fd == fd).map(|f| f.interest)
}

#[test]
fn readiness_round_trip() {
    let (rfd, wfd) = pipe_pair();
    let (_r_guard, _w_guard) = (PipeEnd(rfd), PipeEnd(wfd));

    let mut p = poll::create(&small_config()).unwrap();
    p.add(rfd, Interest::READ).unwrap();
    assert_eq!(p.mask(rfd), Interest::READ);

    // Nothing buffered yet.
    assert_eq!(p.wait(0).unwrap(), 0);

    write_byte(wfd);
    let n = p.wait(1_000).unwrap();
    assert!(n >= 1);
    let interest = fired_for(p.as_ref(), rfd).expect("read end fired");
    assert!(interest.read);
}

#[test]
fn removed_descriptor_never_fires() {
    let (rfd, wfd) = pipe_pair();
    let (_r_guard, _w_guard) = (PipeEnd(rfd), PipeEnd(wfd));

    let mut p = poll::create(&small_config()).unwrap();
    p.add(rfd, Interest::READ).unwrap();
    p.remove(rfd).unwrap();
    assert_eq!(p.mask(rfd), Interest::NONE);

    write_byte(wfd);
    p.wait(50).unwrap();
    assert!(fired_for(p.as_ref(), rfd).is_none());
}

#[test]
fn modify_switches_interest() {
    let (rfd, wfd) = pipe_pair();
    let (_r_guard, _w_guard) = (PipeEnd(rfd), PipeEnd(wfd));

    let mut p = poll::create(&small_config()).unwrap();
    p.add(rfd, Interest::READ).unwrap();
    write_byte(wfd);

    // Read-end interest moved to writability: a pipe read end is never
    // writable, so the buffered byte must not surface.
    p.modify(rfd, Interest::WRITE).unwrap();
    p.wait(50).unwrap();
    assert!(fired_for(p.as_ref(), rfd).is_none());

    p.modify(rfd, Interest::READ).unwrap();
    let n = p.wait(1_000).unwrap();
    assert!(n >= 1);
    assert!(fired_for(p.as_ref(), rfd).expect("readable again").read);
}

#[test]
fn out_of_range_descriptor_is_rejected() {
    let config = small_config();
    let mut p = poll::create(&config).unwrap();

    let fd = config.max_peers as RawFd;
    match p.add(fd, Interest::READ) {
        Err(Error::RegistrationOutOfRange { fd: got, max }) => {
            assert_eq!(got, fd);
            assert_eq!(max, config.max_peers);
        }
        other => panic!("expected out-of-range rejection, got {other:?}"),
    }
    assert_eq!(p.mask(fd), Interest::NONE);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn hangup_reports_read_and_write() {
    let (rfd, wfd) = pipe_pair();
    let _r_guard = PipeEnd(rfd);

    let mut p = poll::create(&small_config()).unwrap();
    p.add(rfd, Interest::READ).unwrap();

    unsafe {
        libc::close(wfd);
    }
    let n = p.wait(1_000).unwrap();
    assert!(n >= 1);
    let interest = fired_for(p.as_ref(), rfd).expect("hangup fired");
    assert!(interest.read && interest.write);
}

mod select_backend {
    use super::*;
    use rivet::poll::select::SelectPoll;

    #[test]
    fn rejects_capacity_beyond_fd_setsize() {
        let config = Config {
            max_peers: libc::FD_SETSIZE as usize + 1,
            ..Config::default()
        };
        match SelectPoll::new(&config) {
            Err(Error::CapacityExceeded) => {}
            other => panic!("expected capacity rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn readiness_round_trip() {
        let (rfd, wfd) = pipe_pair();
        let (_r_guard, _w_guard) = (PipeEnd(rfd), PipeEnd(wfd));

        let mut p = SelectPoll::new(&small_config()).unwrap();
        p.add(rfd, Interest::READ).unwrap();
        assert_eq!(p.wait(0).unwrap(), 0);

        write_byte(wfd);
        let n = p.wait(1_000).unwrap();
        assert_eq!(n, 1);
        assert!(p.fired()[0].interest.read);
        assert_eq!(p.fired()[0].fd, rfd);

        p.remove(rfd).unwrap();
        assert_eq!(p.wait(0).unwrap(), 0);
    }
}
