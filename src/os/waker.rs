// src/os/waker.rs

//! Cross-thread signal that releases a thread blocked waiting on the
//! inotify descriptor.
//!
//! `stop()` and `close()` run on arbitrary threads while the run loop sits
//! in `poll`. The waker is an `eventfd` polled alongside the inotify fd;
//! writing to it makes the poll return so the loop can re-check its state.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use log::{debug, trace};

#[derive(Debug)]
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        debug!("Created waker eventfd: {}", fd);
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Makes the eventfd readable until the next [`Waker::drain`].
    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let n = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            // Counter saturated: it is already readable.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        trace!("Waker fd {} signalled", self.fd.as_raw_fd());
        Ok(())
    }

    /// Clears any pending wake-up.
    pub fn drain(&self) {
        let mut counter: u64 = 0;
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&mut counter as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if n > 0 {
            trace!("Waker fd {} drained ({} pending)", self.fd.as_raw_fd(), counter);
        }
    }
}

impl AsFd for Waker {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
