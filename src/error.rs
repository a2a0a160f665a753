// src/error.rs

//! Error type shared by every notifier operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::flags::Flag;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The flag name is not in the flag table for the running kernel.
    #[error("unknown flag `{0}`")]
    UnknownFlag(String),

    /// The flag exists but is only ever emitted by the kernel.
    #[error("flag `{0}` is emitted by the kernel and cannot be requested")]
    NotRequestable(Flag),

    /// The kernel refused a `mask_create` registration because the inode is already watched.
    #[error("a watch already exists for {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("failed to watch {}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("notifier is closed")]
    Closed,

    #[error("notifier is already running on another thread")]
    AlreadyRunning,

    /// The event buffer does not frame into whole records.
    #[error("corrupt event buffer at byte {offset}: {reason}")]
    Corruption { offset: usize, reason: &'static str },

    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to load config from {}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// An error returned by an event sink, passed through unaltered.
    #[error(transparent)]
    Callback(anyhow::Error),
}

impl NotifyError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        NotifyError::Io { context, source }
    }

    /// True for the duplicate-registration refusal callers routinely skip over.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, NotifyError::AlreadyExists { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NotifyError::Closed)
    }
}
