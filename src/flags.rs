// src/flags.rs

//! Symbolic inotify flags and the per-kernel table that maps them to bits.
//!
//! Every flag lives in one enum. Some flags can only ever be produced by the
//! kernel (`ignored`, `isdir`, ...); they decode like any other flag but are
//! refused when encoding a watch request. Flags added in later kernels are
//! left out of the [`FlagTable`] built for an older kernel, so encoding them
//! fails exactly like a misspelled name.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::error::{NotifyError, Result};

// Not exported by every libc release we build against.
const IN_MASK_CREATE: u32 = 0x1000_0000;

bitflags! {
    /// Raw inotify mask as carried by a kernel event record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const ACCESS = libc::IN_ACCESS;
        const MODIFY = libc::IN_MODIFY;
        const ATTRIB = libc::IN_ATTRIB;
        const CLOSE_WRITE = libc::IN_CLOSE_WRITE;
        const CLOSE_NOWRITE = libc::IN_CLOSE_NOWRITE;
        const OPEN = libc::IN_OPEN;
        const MOVED_FROM = libc::IN_MOVED_FROM;
        const MOVED_TO = libc::IN_MOVED_TO;
        const CREATE = libc::IN_CREATE;
        const DELETE = libc::IN_DELETE;
        const DELETE_SELF = libc::IN_DELETE_SELF;
        const MOVE_SELF = libc::IN_MOVE_SELF;
        const UNMOUNT = libc::IN_UNMOUNT;
        const Q_OVERFLOW = libc::IN_Q_OVERFLOW;
        const IGNORED = libc::IN_IGNORED;
        const ONLYDIR = libc::IN_ONLYDIR;
        const DONT_FOLLOW = libc::IN_DONT_FOLLOW;
        const EXCL_UNLINK = libc::IN_EXCL_UNLINK;
        const MASK_CREATE = IN_MASK_CREATE;
        const MASK_ADD = libc::IN_MASK_ADD;
        const ISDIR = libc::IN_ISDIR;
        const ONESHOT = libc::IN_ONESHOT;
    }
}

/// A symbolic inotify flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Access,
    Modify,
    Attrib,
    CloseWrite,
    CloseNowrite,
    Close,
    Open,
    MovedFrom,
    MovedTo,
    Move,
    Create,
    Delete,
    DeleteSelf,
    MoveSelf,
    /// Shorthand for every event flag; never produced by decoding.
    AllEvents,
    OnlyDir,
    DontFollow,
    ExclUnlink,
    MaskCreate,
    MaskAdd,
    Oneshot,
    Unmount,
    QueueOverflow,
    Ignored,
    IsDir,
}

impl Flag {
    /// Every flag in decode order.
    pub const ALL: [Flag; 25] = [
        Flag::Access,
        Flag::Modify,
        Flag::Attrib,
        Flag::CloseWrite,
        Flag::CloseNowrite,
        Flag::Close,
        Flag::Open,
        Flag::MovedFrom,
        Flag::MovedTo,
        Flag::Move,
        Flag::Create,
        Flag::Delete,
        Flag::DeleteSelf,
        Flag::MoveSelf,
        Flag::AllEvents,
        Flag::OnlyDir,
        Flag::DontFollow,
        Flag::ExclUnlink,
        Flag::MaskCreate,
        Flag::MaskAdd,
        Flag::Oneshot,
        Flag::Unmount,
        Flag::QueueOverflow,
        Flag::Ignored,
        Flag::IsDir,
    ];

    pub fn bits(self) -> u32 {
        match self {
            Flag::Access => libc::IN_ACCESS,
            Flag::Modify => libc::IN_MODIFY,
            Flag::Attrib => libc::IN_ATTRIB,
            Flag::CloseWrite => libc::IN_CLOSE_WRITE,
            Flag::CloseNowrite => libc::IN_CLOSE_NOWRITE,
            Flag::Close => libc::IN_CLOSE_WRITE | libc::IN_CLOSE_NOWRITE,
            Flag::Open => libc::IN_OPEN,
            Flag::MovedFrom => libc::IN_MOVED_FROM,
            Flag::MovedTo => libc::IN_MOVED_TO,
            Flag::Move => libc::IN_MOVED_FROM | libc::IN_MOVED_TO,
            Flag::Create => libc::IN_CREATE,
            Flag::Delete => libc::IN_DELETE,
            Flag::DeleteSelf => libc::IN_DELETE_SELF,
            Flag::MoveSelf => libc::IN_MOVE_SELF,
            Flag::AllEvents => libc::IN_ALL_EVENTS,
            Flag::OnlyDir => libc::IN_ONLYDIR,
            Flag::DontFollow => libc::IN_DONT_FOLLOW,
            Flag::ExclUnlink => libc::IN_EXCL_UNLINK,
            Flag::MaskCreate => IN_MASK_CREATE,
            Flag::MaskAdd => libc::IN_MASK_ADD,
            Flag::Oneshot => libc::IN_ONESHOT,
            Flag::Unmount => libc::IN_UNMOUNT,
            Flag::QueueOverflow => libc::IN_Q_OVERFLOW,
            Flag::Ignored => libc::IN_IGNORED,
            Flag::IsDir => libc::IN_ISDIR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::Access => "access",
            Flag::Modify => "modify",
            Flag::Attrib => "attrib",
            Flag::CloseWrite => "close_write",
            Flag::CloseNowrite => "close_nowrite",
            Flag::Close => "close",
            Flag::Open => "open",
            Flag::MovedFrom => "moved_from",
            Flag::MovedTo => "moved_to",
            Flag::Move => "move",
            Flag::Create => "create",
            Flag::Delete => "delete",
            Flag::DeleteSelf => "delete_self",
            Flag::MoveSelf => "move_self",
            Flag::AllEvents => "all_events",
            Flag::OnlyDir => "onlydir",
            Flag::DontFollow => "dont_follow",
            Flag::ExclUnlink => "excl_unlink",
            Flag::MaskCreate => "mask_create",
            Flag::MaskAdd => "mask_add",
            Flag::Oneshot => "oneshot",
            Flag::Unmount => "unmount",
            Flag::QueueOverflow => "q_overflow",
            Flag::Ignored => "ignored",
            Flag::IsDir => "isdir",
        }
    }

    /// False for flags only the kernel sets on emitted events.
    pub fn is_requestable(self) -> bool {
        !matches!(
            self,
            Flag::Ignored | Flag::IsDir | Flag::Unmount | Flag::QueueOverflow
        )
    }

    /// Oldest kernel that understands the flag.
    fn since(self) -> KernelVersion {
        match self {
            Flag::OnlyDir | Flag::DontFollow => KernelVersion::new(2, 6, 15),
            Flag::ExclUnlink => KernelVersion::new(2, 6, 36),
            Flag::MaskCreate => KernelVersion::new(4, 18, 0),
            _ => KernelVersion::new(2, 6, 13),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Flag {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        Flag::ALL
            .iter()
            .copied()
            .find(|flag| flag.name() == s)
            .ok_or_else(|| NotifyError::UnknownFlag(s.to_string()))
    }
}

/// Kernel release triple as reported by `uname`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a release string such as `6.8.0-45-generic`. Missing
    /// components are zero; anything after the leading digits of a component
    /// is ignored.
    pub fn parse(release: &str) -> Option<Self> {
        let mut parts = release.split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });
        let major = parts.next().flatten()?;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// Reads the running kernel's release.
    pub fn detect() -> Option<Self> {
        let uts = match nix::sys::utsname::uname() {
            Ok(uts) => uts,
            Err(e) => {
                warn!("uname failed, cannot detect kernel version: {}", e);
                return None;
            }
        };
        let release = uts.release().to_string_lossy();
        let version = Self::parse(&release);
        if version.is_none() {
            warn!("Unrecognised kernel release string '{}'", release);
        }
        version
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

static DETECTED: Lazy<FlagTable> = Lazy::new(|| {
    let version = KernelVersion::detect().unwrap_or(FlagTable::NEWEST);
    debug!("Building inotify flag table for kernel {}", version);
    FlagTable::for_kernel(version)
});

/// The flags available on one kernel version, with encode/decode against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagTable {
    version: KernelVersion,
    flags: Vec<Flag>,
}

impl FlagTable {
    /// Assumed when the running kernel cannot be identified.
    pub const NEWEST: KernelVersion = KernelVersion::new(u32::MAX, 0, 0);

    pub fn for_kernel(version: KernelVersion) -> Self {
        let flags = Flag::ALL
            .iter()
            .copied()
            .filter(|flag| flag.since() <= version)
            .collect();
        Self { version, flags }
    }

    /// Table for the running kernel, built once per process.
    pub fn detect() -> Self {
        DETECTED.clone()
    }

    pub fn version(&self) -> KernelVersion {
        self.version
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn lookup(&self, name: &str) -> Result<Flag> {
        let flag: Flag = name.parse()?;
        if !self.contains(flag) {
            return Err(NotifyError::UnknownFlag(name.to_string()));
        }
        Ok(flag)
    }

    /// Encodes symbolic names into a registration mask.
    pub fn encode<I, S>(&self, names: I) -> Result<u32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = 0;
        for name in names {
            let flag = self.lookup(name.as_ref())?;
            mask |= self.requestable_bits(flag)?;
        }
        Ok(mask)
    }

    pub fn encode_flags(&self, flags: &[Flag]) -> Result<u32> {
        let mut mask = 0;
        for &flag in flags {
            if !self.contains(flag) {
                return Err(NotifyError::UnknownFlag(flag.name().to_string()));
            }
            mask |= self.requestable_bits(flag)?;
        }
        Ok(mask)
    }

    fn requestable_bits(&self, flag: Flag) -> Result<u32> {
        if !flag.is_requestable() {
            return Err(NotifyError::NotRequestable(flag));
        }
        Ok(flag.bits())
    }

    /// Every known flag intersecting `mask`, in table order. `all_events` is
    /// never reported and bits with no flag are dropped.
    pub fn decode(&self, mask: u32) -> Vec<Flag> {
        self.flags
            .iter()
            .copied()
            .filter(|&flag| flag != Flag::AllEvents && mask & flag.bits() != 0)
            .collect()
    }
}
