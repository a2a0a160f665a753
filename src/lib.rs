// src/lib.rs

//! Filesystem change notifications over a single pollable inotify descriptor.
//!
//! ```no_run
//! use fsnotifier::{Event, Notifier};
//!
//! # fn main() -> fsnotifier::Result<()> {
//! let notifier = Notifier::new()?;
//! notifier.watch("/tmp", ["create", "delete"], |event: &Event| -> anyhow::Result<()> {
//!     println!("{}", event);
//!     Ok(())
//! })?;
//! notifier.run()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod flags;
pub mod notifier;
pub mod os;
pub mod registry;

pub use config::{Config, CONFIG};
pub use error::{NotifyError, Result};
pub use event::{Event, EventSink, WatchId};
pub use flags::{EventMask, Flag, FlagTable, KernelVersion};
pub use notifier::{Notifier, ReadinessHandle, RunState};
pub use os::readiness::poll_readable;
