// src/os/readiness.rs

//! `poll(2)` wrapper used both by the notifier's own blocking wait and by
//! callers multiplexing the notifier with other descriptors.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use bitflags::bitflags;
use log::trace;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PollFlags: i16 {
        const POLLIN = libc::POLLIN;
        const POLLPRI = libc::POLLPRI;
        const POLLOUT = libc::POLLOUT;
        const POLLERR = libc::POLLERR;
        const POLLHUP = libc::POLLHUP;
        const POLLNVAL = libc::POLLNVAL;
    }
}

pub fn pollfd(fd: RawFd, flags: PollFlags) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: flags.bits(),
        revents: 0,
    }
}

pub fn revents(entry: &libc::pollfd) -> PollFlags {
    PollFlags::from_bits_truncate(entry.revents)
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

/// Blocks until an entry is ready or the timeout passes. Returns the number
/// of ready entries; an interrupted wait reports zero.
pub fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let n = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if n == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            trace!("poll interrupted (EINTR), reporting no ready fds");
            return Ok(0);
        }
        return Err(err);
    }
    Ok(n as usize)
}

/// The subset of `fds` that became readable (or hung up) within `timeout`.
pub fn poll_readable(fds: &[RawFd], timeout: Option<Duration>) -> io::Result<Vec<RawFd>> {
    let mut entries: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| pollfd(fd, PollFlags::POLLIN))
        .collect();
    poll(&mut entries, timeout)?;
    Ok(entries
        .iter()
        .filter(|entry| revents(entry).intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
        .map(|entry| entry.fd)
        .collect())
}

/// Non-owning view of a notifier's descriptor for external readiness waits.
///
/// Dropping it never closes anything. It names a live descriptor only while
/// the notifier it came from is open.
#[derive(Debug, PartialEq, Eq)]
pub struct ReadinessHandle {
    fd: RawFd,
}

impl ReadinessHandle {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// True once the notifier has events queued.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        Ok(!poll_readable(&[self.fd], timeout)?.is_empty())
    }
}

impl AsRawFd for ReadinessHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}
