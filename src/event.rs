// src/event.rs

//! Events delivered to sinks, and the sink trait itself.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::decoder::RawRecord;
use crate::flags::{EventMask, Flag, FlagTable};

/// Kernel-assigned identifier of one watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub(crate) i32);

impl WatchId {
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A filesystem change on a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub watch_id: WatchId,
    /// Decoded flags. Kernel-only flags are left out apart from `ignored`
    /// and `q_overflow`; use [`Event::mask`] for the rest.
    pub flags: Vec<Flag>,
    pub mask: EventMask,
    /// Pairs a `moved_from` with its `moved_to`; zero otherwise.
    pub cookie: u32,
    /// Entry name inside a watched directory.
    pub name: Option<OsString>,
    /// The watch path, joined with `name` when present.
    pub path: PathBuf,
}

impl Event {
    pub(crate) fn from_record(record: &RawRecord<'_>, watch_path: &Path, table: &FlagTable) -> Self {
        let flags = table
            .decode(record.mask)
            .into_iter()
            .filter(|flag| {
                flag.is_requestable() || matches!(flag, Flag::Ignored | Flag::QueueOverflow)
            })
            .collect();
        let name = record.name.map(|n| OsStr::from_bytes(n).to_os_string());
        let path = match &name {
            Some(name) => watch_path.join(name),
            None => watch_path.to_path_buf(),
        };
        Self {
            watch_id: WatchId(record.wd),
            flags,
            mask: EventMask::from_bits_retain(record.mask),
            cookie: record.cookie,
            name,
            path,
        }
    }

    pub fn has(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_dir(&self) -> bool {
        self.mask.contains(EventMask::ISDIR)
    }

    /// The kernel will send nothing further for this watch.
    pub fn is_terminal(&self) -> bool {
        self.mask.contains(EventMask::IGNORED)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.flags.iter().map(|flag| flag.name()).collect();
        write!(f, "{} [{}]", self.path.display(), names.join(","))?;
        if self.cookie != 0 {
            write!(f, " cookie={}", self.cookie)?;
        }
        Ok(())
    }
}

/// Receives the events of one watch.
///
/// Called synchronously on the thread running `process`/`run`, with no
/// notifier lock held, so it may call back into the notifier. An error aborts
/// the rest of the current batch and is returned from `process`/`run`.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> EventSink for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}
