// src/notifier.rs

//! The notifier: one inotify descriptor, the watches registered on it, and
//! the loop that reads, decodes, and dispatches their events.
//!
//! A `Notifier` is `Send + Sync` and is meant to be shared through an `Arc`:
//! one thread drives [`Notifier::run`] (or calls [`Notifier::process`]),
//! while any thread, including a sink running on the loop thread, may call
//! [`Notifier::stop`], [`Notifier::watch`], or [`Notifier::close`].
//!
//! Run-state transitions:
//!
//! ```text
//! Idle --run--> Running --stop--> Stopping --loop exits--> Idle
//! Idle --stop--> Stopping --run--> Idle          (pending stop consumed)
//! any  --close--> Closed
//! ```

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};

use log::{debug, info, trace, warn};

use crate::config::{Config, CONFIG};
use crate::decoder;
use crate::error::{NotifyError, Result};
use crate::event::{Event, EventSink, WatchId};
use crate::flags::{EventMask, Flag, FlagTable};
use crate::os::{self, inotify, readiness, readiness::PollFlags, waker::Waker};
use crate::registry::{Registry, Watch};

pub use crate::os::readiness::ReadinessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Closed = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Idle,
            1 => RunState::Running,
            2 => RunState::Stopping,
            _ => RunState::Closed,
        }
    }
}

/// Outcome of one blocking wait on the descriptor.
enum Chunk {
    Read(usize),
    Woken,
}

pub struct Notifier {
    /// `None` once closed. Waits and reads hold the shared lock; `close`
    /// takes the exclusive lock, so the fd is never closed under a reader.
    fd: RwLock<Option<OwnedFd>>,
    raw_fd: RawFd,
    waker: Waker,
    registry: Registry,
    state: AtomicU8,
    handle: OnceLock<ReadinessHandle>,
    table: FlagTable,
    buffer_size: usize,
    /// Read buffer parked between calls. A reentrant `process` from a sink
    /// finds it taken and allocates its own.
    spare_buffer: Mutex<Option<Vec<u8>>>,
}

impl Notifier {
    /// Creates a notifier using the process-wide [`CONFIG`] and the flag
    /// table of the running kernel.
    pub fn new() -> Result<Self> {
        Self::with_config(&CONFIG)
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        Self::with_table(config, FlagTable::detect())
    }

    pub fn with_table(config: &Config, table: FlagTable) -> Result<Self> {
        let fd = inotify::init().map_err(|e| NotifyError::io("failed to create inotify instance", e))?;
        let waker = Waker::new().map_err(|e| NotifyError::io("failed to create waker eventfd", e))?;
        let raw_fd = fd.as_raw_fd();
        debug!(
            "Notifier created (inotify fd {}, kernel flag table {})",
            raw_fd,
            table.version()
        );
        Ok(Self {
            fd: RwLock::new(Some(fd)),
            raw_fd,
            waker,
            registry: Registry::new(),
            state: AtomicU8::new(RunState::Idle as u8),
            handle: OnceLock::new(),
            table,
            buffer_size: config.effective_read_buffer_size(),
            spare_buffer: Mutex::new(None),
        })
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn flag_table(&self) -> &FlagTable {
        &self.table
    }

    fn transition(&self, from: RunState, to: RunState) -> std::result::Result<(), RunState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(RunState::from_u8)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == RunState::Closed {
            return Err(NotifyError::Closed);
        }
        Ok(())
    }

    fn descriptor(&self) -> Result<RwLockReadGuard<'_, Option<OwnedFd>>> {
        self.ensure_open()?;
        // The slot is only ever swapped to `None`; poisoning cannot leave it torn.
        let guard = self.fd.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            return Err(NotifyError::Closed);
        }
        Ok(guard)
    }

    /// Watches `path` for the named flags (`"create"`, `"close_write"`, ...).
    ///
    /// A kernel refusal is returned as-is: combining `mask_create` with a path
    /// that is already watched fails with [`NotifyError::AlreadyExists`] until
    /// the existing watch is removed or retired.
    pub fn watch<P, I, S, K>(&self, path: P, flags: I, sink: K) -> Result<WatchId>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        K: EventSink + 'static,
    {
        let flags = flags
            .into_iter()
            .map(|name| self.table.lookup(name.as_ref()))
            .collect::<Result<Vec<Flag>>>()?;
        self.watch_flags(path, &flags, sink)
    }

    pub fn watch_flags<P, K>(&self, path: P, flags: &[Flag], sink: K) -> Result<WatchId>
    where
        P: AsRef<Path>,
        K: EventSink + 'static,
    {
        let path = path.as_ref();
        let mask = self.table.encode_flags(flags)?;

        let guard = self.descriptor()?;
        let Some(fd) = guard.as_ref() else {
            return Err(NotifyError::Closed);
        };
        let wd = inotify::add_watch(fd.as_fd(), path, mask).map_err(|source| {
            if source.raw_os_error() == Some(libc::EEXIST) {
                NotifyError::AlreadyExists {
                    path: path.to_path_buf(),
                }
            } else {
                NotifyError::Watch {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        drop(guard);

        let id = WatchId(wd);
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        self.registry
            .insert(Watch::new(id, path.to_path_buf(), flags.to_vec(), sink))?;
        debug!(
            "Watching {} as watch {} (mask {:?})",
            path.display(),
            id,
            EventMask::from_bits_retain(mask)
        );
        Ok(id)
    }

    /// Stops watching `id`. Removing a watch the kernel already retired is
    /// not an error.
    pub fn remove(&self, id: WatchId) -> Result<()> {
        let guard = self.descriptor()?;
        if let Some(fd) = guard.as_ref() {
            match inotify::rm_watch(fd.as_fd(), id.as_raw()) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                    trace!("Watch {} was already gone in the kernel", id);
                }
                Err(e) => return Err(NotifyError::io("inotify_rm_watch failed", e)),
            }
        }
        drop(guard);
        if let Some(watch) = self.registry.remove(id) {
            debug!("Removed watch {} ({})", id, watch.path().display());
        }
        Ok(())
    }

    /// Ids and paths of every live watch.
    pub fn watches(&self) -> Result<Vec<(WatchId, PathBuf)>> {
        self.ensure_open()?;
        Ok(self.registry.snapshot())
    }

    /// Blocks until events are queued or the waker fires, then reads one
    /// chunk.
    fn read_chunk(&self, buf: &mut [u8]) -> Result<Chunk> {
        loop {
            let guard = self.descriptor()?;
            let Some(fd) = guard.as_ref() else {
                return Err(NotifyError::Closed);
            };

            let mut fds = [
                readiness::pollfd(fd.as_raw_fd(), PollFlags::POLLIN),
                readiness::pollfd(self.waker.as_fd().as_raw_fd(), PollFlags::POLLIN),
            ];
            readiness::poll(&mut fds, None)
                .map_err(|e| NotifyError::io("poll on inotify fd failed", e))?;

            if readiness::revents(&fds[0]).contains(PollFlags::POLLIN) {
                match inotify::read_chunk(fd.as_fd(), buf) {
                    Ok(Some(n)) => return Ok(Chunk::Read(n)),
                    // Another reader drained the queue first.
                    Ok(None) => {}
                    Err(e) => return Err(NotifyError::io("read from inotify fd failed", e)),
                }
            }
            if readiness::revents(&fds[1]).contains(PollFlags::POLLIN) {
                drop(guard);
                // A pending stop or a close leaves the waker armed until it is
                // consumed, so every waiter sees it. Any other wake-up is stale.
                match self.state() {
                    RunState::Stopping => return Ok(Chunk::Woken),
                    RunState::Closed => return Err(NotifyError::Closed),
                    state => {
                        trace!("Draining stale wake-up on fd {} while {:?}", self.raw_fd, state);
                        self.waker.drain();
                    }
                }
            }
        }
    }

    fn take_buffer(&self) -> Vec<u8> {
        self.spare_buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    fn park_buffer(&self, buf: Vec<u8>) {
        *self
            .spare_buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(buf);
    }

    /// Reads one chunk of events (blocking until one is available) and
    /// dispatches each to its watch's sink, in kernel order.
    ///
    /// Returns the number of events delivered. Returns `Ok(0)` without
    /// reading if a pending `stop` releases the wait; a stale wake-up left
    /// on the waker is drained and the wait continues. A sink error stops the
    /// batch: events already delivered stay delivered and the rest of the
    /// chunk is discarded.
    pub fn process(&self) -> Result<usize> {
        let mut buf = self.take_buffer();
        let result = match self.read_chunk(&mut buf) {
            Ok(Chunk::Read(n)) => self.dispatch(&buf[..n]),
            Ok(Chunk::Woken) => Ok(0),
            Err(e) => Err(e),
        };
        self.park_buffer(buf);
        result
    }

    fn dispatch(&self, buf: &[u8]) -> Result<usize> {
        let mut delivered = 0;
        let mut records = decoder::decode(buf);
        while let Some(record) = records.next() {
            let record = record?;
            let Some(watch) = self.resolve(record.wd, record.mask) else {
                continue;
            };
            let event = Event::from_record(&record, watch.path(), &self.table);
            trace!(
                "Dispatching event to watch {} ({} bytes): {}",
                watch.id(),
                record.len,
                event
            );

            let handled = watch.sink().handle(&event);
            if event.is_terminal() {
                self.retire(watch.id());
            }
            if let Err(e) = handled {
                debug!(
                    "Sink for watch {} failed; {} undecoded bytes of the batch dropped",
                    watch.id(),
                    records.remaining()
                );
                return Err(NotifyError::Callback(e));
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    fn resolve(&self, wd: i32, mask: u32) -> Option<Arc<Watch>> {
        if mask & libc::IN_Q_OVERFLOW != 0 {
            warn!("inotify event queue overflowed on fd {}; events were lost", self.raw_fd);
        }
        let watch = self.registry.resolve(WatchId(wd));
        if watch.is_none() {
            trace!("Dropping event for stale watch {} (mask {:#x})", wd, mask);
        }
        watch
    }

    fn retire(&self, id: WatchId) {
        if let Some(watch) = self.registry.remove(id) {
            debug!("Watch {} on {} retired by the kernel", id, watch.path().display());
        }
    }

    /// Reads one chunk and returns its events without invoking any sink.
    /// Watches whose terminal event is among them are still retired.
    pub fn read_events(&self) -> Result<Vec<Event>> {
        let mut buf = self.take_buffer();
        let result = match self.read_chunk(&mut buf) {
            Ok(Chunk::Read(n)) => self.collect_events(&buf[..n]),
            Ok(Chunk::Woken) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        self.park_buffer(buf);
        result
    }

    fn collect_events(&self, buf: &[u8]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for record in decoder::decode(buf) {
            let record = record?;
            let Some(watch) = self.resolve(record.wd, record.mask) else {
                continue;
            };
            let event = Event::from_record(&record, watch.path(), &self.table);
            if event.is_terminal() {
                self.retire(watch.id());
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Processes events until [`Notifier::stop`] is called.
    ///
    /// A stop requested before `run` starts makes it return immediately. The
    /// state is re-checked after every batch, so a sink calling `stop` ends
    /// the loop once the current batch is done. If the notifier is closed
    /// underneath the loop, `run` returns [`NotifyError::Closed`].
    pub fn run(&self) -> Result<()> {
        match self.transition(RunState::Idle, RunState::Running) {
            Ok(()) => {}
            Err(RunState::Stopping) => {
                if self.transition(RunState::Stopping, RunState::Idle).is_ok() {
                    self.waker.drain();
                }
                debug!("Pending stop consumed, run loop not started");
                return Ok(());
            }
            Err(RunState::Running) => return Err(NotifyError::AlreadyRunning),
            Err(_) => return Err(NotifyError::Closed),
        }
        info!("Notifier run loop started on fd {}", self.raw_fd);

        let mut buf = self.take_buffer();
        let result = loop {
            match self.state() {
                RunState::Running => {}
                RunState::Closed => break Err(NotifyError::Closed),
                _ => break Ok(()),
            }
            match self.read_chunk(&mut buf) {
                Ok(Chunk::Read(n)) => {
                    if let Err(e) = self.dispatch(&buf[..n]) {
                        break Err(e);
                    }
                }
                Ok(Chunk::Woken) => {}
                Err(e) => break Err(e),
            }
        };
        self.park_buffer(buf);

        // Drain before going Idle so a stop issued after the transition keeps
        // its wake-up. A wake that slips in between is drained as stale later.
        if self.state() != RunState::Closed {
            self.waker.drain();
        }
        for from in [RunState::Running, RunState::Stopping] {
            if self.transition(from, RunState::Idle).is_ok() {
                break;
            }
        }
        info!("Notifier run loop on fd {} exited", self.raw_fd);
        result
    }

    /// Asks a running (or about to run) loop to exit. Safe from any thread,
    /// including from inside a sink. Never fails.
    pub fn stop(&self) {
        loop {
            let current = self.state();
            match current {
                RunState::Idle | RunState::Running => {
                    if self.transition(current, RunState::Stopping).is_err() {
                        continue;
                    }
                    debug!("Stop requested on notifier fd {}", self.raw_fd);
                    if let Err(e) = self.waker.wake() {
                        warn!("Failed to wake notifier fd {}: {}", self.raw_fd, e);
                    }
                    return;
                }
                RunState::Stopping | RunState::Closed => return,
            }
        }
    }

    /// The inotify descriptor number, stable until close.
    pub fn fd(&self) -> Result<RawFd> {
        self.ensure_open()?;
        Ok(self.raw_fd)
    }

    /// Memoized handle for `poll`/`select`-style multiplexing. Every call
    /// returns the same instance, whose fd equals [`Notifier::fd`]. The
    /// notifier keeps ownership of the descriptor.
    pub fn to_io(&self) -> Result<&ReadinessHandle> {
        self.ensure_open()?;
        Ok(self
            .handle
            .get_or_init(|| ReadinessHandle::new(self.raw_fd)))
    }

    /// Invalidates every watch and closes the descriptor. Idempotent.
    ///
    /// A thread blocked in `run`/`process` is woken first; `close` then
    /// waits only for that thread to let go of the descriptor, which it does
    /// before dispatching anything. The blocked call returns
    /// [`NotifyError::Closed`].
    pub fn close(&self) -> Result<()> {
        let previous = RunState::from_u8(self.state.swap(RunState::Closed as u8, Ordering::SeqCst));
        if previous == RunState::Closed {
            return Ok(());
        }
        self.registry.close();
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake notifier fd {} for close: {}", self.raw_fd, e);
        }

        let fd = self
            .fd
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(fd) = fd {
            os::close_fd(fd, "inotify");
        }
        debug!("Notifier on fd {} closed (was {:?})", self.raw_fd, previous);
        Ok(())
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if self.state() != RunState::Closed {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("fd", &self.raw_fd)
            .field("state", &self.state())
            .field("watches", &self.registry.len())
            .finish()
    }
}
