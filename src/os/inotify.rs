// src/os/inotify.rs

//! Raw `libc` calls for the inotify instance: creation, watch registration,
//! and non-blocking reads.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::{debug, trace};

const NAME_MAX: usize = 255;

/// Smallest buffer guaranteed to hold one event with a maximal name.
pub const MIN_READ_BUFFER: usize = crate::decoder::HEADER_LEN + NAME_MAX + 1;

/// Creates a close-on-exec, non-blocking inotify instance.
pub fn init() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    debug!("Created inotify instance with fd: {}", fd);
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Registers `path` and returns the kernel's watch descriptor.
pub fn add_watch(fd: BorrowedFd<'_>, path: &Path, mask: u32) -> io::Result<i32> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "path contains an interior NUL byte")
    })?;
    let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), mask) };
    if wd == -1 {
        return Err(io::Error::last_os_error());
    }
    trace!(
        "inotify_add_watch(fd {}, {}, {:#x}) -> wd {}",
        fd.as_raw_fd(),
        path.display(),
        mask,
        wd
    );
    Ok(wd)
}

pub fn rm_watch(fd: BorrowedFd<'_>, wd: i32) -> io::Result<()> {
    if unsafe { libc::inotify_rm_watch(fd.as_raw_fd(), wd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    trace!("inotify_rm_watch(fd {}, wd {})", fd.as_raw_fd(), wd);
    Ok(())
}

/// Reads whatever complete events are queued. Returns `Ok(None)` when the
/// queue is empty; `EINTR` is retried.
pub fn read_chunk(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            trace!("Read {} bytes from inotify fd {}", n, fd.as_raw_fd());
            return Ok(Some(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}
