// src/os/mod.rs

//! Thin wrappers over the raw syscalls the notifier is built on.

pub mod inotify;
pub mod readiness;
pub mod waker;

use std::io;
use std::os::fd::{IntoRawFd, OwnedFd};

use log::{debug, warn};

/// Closes `fd`, logging instead of silently dropping a failed `close(2)`.
pub fn close_fd(fd: OwnedFd, what: &str) {
    let raw = fd.into_raw_fd();
    if unsafe { libc::close(raw) } == -1 {
        warn!(
            "Failed to close {} fd {}: {}",
            what,
            raw,
            io::Error::last_os_error()
        );
    } else {
        debug!("Closed {} fd {}", what, raw);
    }
}
