//! Creating and discarding many notifiers must not leak descriptors or close
//! anyone else's.
//!
//! Kept alone in its own test binary so the open-descriptor count is not
//! disturbed by other tests running in parallel.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use fsnotifier::{poll_readable, Notifier};

const NOTIFIER_COUNT: usize = 64;

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

fn pipe() -> (File, File) {
    let (read, write): (OwnedFd, OwnedFd) = nix::unistd::pipe().unwrap();
    (File::from(read), File::from(write))
}

#[test_log::test]
fn test_discarded_notifiers_leave_other_descriptors_intact() {
    let (mut before_read, mut before_write) = pipe();
    let baseline = open_fd_count();

    for i in 0..NOTIFIER_COUNT {
        let notifier = Notifier::new().unwrap();
        let handle_fd = notifier.to_io().unwrap().as_raw_fd();
        assert_eq!(handle_fd, notifier.fd().unwrap());
        // Alternate explicit close and close-on-drop.
        if i % 2 == 0 {
            notifier.close().unwrap();
        }
    }
    assert_eq!(open_fd_count(), baseline, "notifier descriptors leaked");

    let (mut after_read, mut after_write) = pipe();
    let fds = [before_read.as_raw_fd(), after_read.as_raw_fd()];
    assert!(poll_readable(&fds, Some(Duration::ZERO)).unwrap().is_empty());

    after_write.write_all(b"a").unwrap();
    assert_eq!(
        poll_readable(&fds, Some(Duration::from_secs(1))).unwrap(),
        vec![after_read.as_raw_fd()]
    );
    before_write.write_all(b"b").unwrap();
    assert_eq!(poll_readable(&fds, Some(Duration::from_secs(1))).unwrap(), fds.to_vec());

    let mut byte = [0u8; 1];
    before_read.read_exact(&mut byte).unwrap();
    assert_eq!(&byte, b"b");
    after_read.read_exact(&mut byte).unwrap();
    assert_eq!(&byte, b"a");
}
