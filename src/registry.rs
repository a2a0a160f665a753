// src/registry.rs

//! Maps kernel watch ids to the watch that owns them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use crate::error::{NotifyError, Result};
use crate::event::{EventSink, WatchId};
use crate::flags::Flag;

/// A registered path and the sink its events go to.
pub struct Watch {
    id: WatchId,
    path: PathBuf,
    flags: Vec<Flag>,
    sink: Arc<dyn EventSink>,
}

impl Watch {
    pub fn new(id: WatchId, path: PathBuf, flags: Vec<Flag>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            id,
            path,
            flags,
            sink,
        }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flags requested at registration.
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Slots {
    watches: HashMap<WatchId, Arc<Watch>>,
    closed: bool,
}

/// Thread-safe id → watch table.
///
/// The lock is held only for the map operation itself; callers get an
/// `Arc<Watch>` back and invoke the sink after the lock is released.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panicking sink never runs under this lock, so poisoning carries no torn state.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `watch`, returning the entry it replaced.
    ///
    /// The kernel hands back an existing id when the same inode is registered
    /// again; the new registration then supersedes the old one. A watch that
    /// asked for `mask_create` must never land on a live id.
    pub fn insert(&self, watch: Watch) -> Result<Option<Arc<Watch>>> {
        let mut slots = self.lock();
        if slots.closed {
            return Err(NotifyError::Closed);
        }
        if watch.flags.contains(&Flag::MaskCreate) && slots.watches.contains_key(&watch.id) {
            return Err(NotifyError::AlreadyExists {
                path: watch.path.clone(),
            });
        }
        let id = watch.id;
        let previous = slots.watches.insert(id, Arc::new(watch));
        match &previous {
            Some(old) => debug!("Watch {} re-registered (was {})", id, old.path.display()),
            None => trace!("Watch {} registered", id),
        }
        Ok(previous)
    }

    /// `None` means the id has already been retired.
    pub fn resolve(&self, id: WatchId) -> Option<Arc<Watch>> {
        self.lock().watches.get(&id).cloned()
    }

    /// Removing an absent id is a no-op.
    pub fn remove(&self, id: WatchId) -> Option<Arc<Watch>> {
        let removed = self.lock().watches.remove(&id);
        if removed.is_some() {
            trace!("Watch {} removed from registry", id);
        }
        removed
    }

    /// Drops every entry and refuses further inserts.
    pub fn close(&self) -> usize {
        let mut slots = self.lock();
        slots.closed = true;
        let drained = slots.watches.len();
        slots.watches.clear();
        debug!("Registry closed, {} watches invalidated", drained);
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current ids and paths, sorted by id.
    pub fn snapshot(&self) -> Vec<(WatchId, PathBuf)> {
        let mut entries: Vec<_> = self
            .lock()
            .watches
            .values()
            .map(|watch| (watch.id, watch.path.clone()))
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn noop() -> Arc<dyn EventSink> {
        Arc::new(|_: &Event| -> anyhow::Result<()> { Ok(()) })
    }

    fn watch(id: i32, path: &str, flags: Vec<Flag>) -> Watch {
        Watch::new(WatchId(id), PathBuf::from(path), flags, noop())
    }

    #[test_log::test]
    fn test_insert_and_resolve() {
        let registry = Registry::new();
        assert!(registry.insert(watch(1, "/a", vec![Flag::Create])).unwrap().is_none());
        let found = registry.resolve(WatchId(1)).expect("watch 1 registered");
        assert_eq!(found.path(), Path::new("/a"));
        assert!(registry.resolve(WatchId(2)).is_none());
    }

    #[test_log::test]
    fn test_reinsert_same_id_replaces() {
        let registry = Registry::new();
        registry.insert(watch(1, "/a", vec![Flag::Create])).unwrap();
        let previous = registry
            .insert(watch(1, "/a", vec![Flag::Delete]))
            .unwrap()
            .expect("first watch replaced");
        assert_eq!(previous.flags(), &[Flag::Create]);
        assert_eq!(registry.resolve(WatchId(1)).unwrap().flags(), &[Flag::Delete]);
        assert_eq!(registry.len(), 1);
    }

    #[test_log::test]
    fn test_mask_create_collision_is_already_exists() {
        let registry = Registry::new();
        registry.insert(watch(1, "/a", vec![Flag::Create])).unwrap();
        let err = registry
            .insert(watch(1, "/a", vec![Flag::Create, Flag::MaskCreate]))
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test_log::test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        registry.insert(watch(5, "/a", vec![])).unwrap();
        assert!(registry.remove(WatchId(5)).is_some());
        assert!(registry.remove(WatchId(5)).is_none());
        assert!(registry.is_empty());
    }

    #[test_log::test]
    fn test_close_invalidates_everything() {
        let registry = Registry::new();
        registry.insert(watch(1, "/a", vec![])).unwrap();
        registry.insert(watch(2, "/b", vec![])).unwrap();
        assert_eq!(
            registry.snapshot(),
            vec![(WatchId(1), PathBuf::from("/a")), (WatchId(2), PathBuf::from("/b"))]
        );

        assert_eq!(registry.close(), 2);
        assert!(registry.resolve(WatchId(1)).is_none());
        assert!(registry.resolve(WatchId(2)).is_none());
        assert!(registry.insert(watch(3, "/c", vec![])).unwrap_err().is_closed());
    }
}
