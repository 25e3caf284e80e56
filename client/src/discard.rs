//! Echo suppression between worker and watcher.
//!
//! Before the worker materializes a remote change onto disk it inserts the
//! target path here; the rename-into-place makes the watcher observe a
//! Remove on that path, which it swallows by taking the entry back out.
//! Entries expire after a short TTL so a rename that never produced an
//! event cannot leak a suppression forever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ENTRY_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct DiscardSet {
    inner: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl DiscardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: PathBuf) {
        self.inner
            .lock()
            .expect("discard set lock poisoned")
            .insert(path, Instant::now());
    }

    /// Remove `path` from the set, reporting whether a live entry was there.
    pub fn take(&self, path: &Path) -> bool {
        let mut map = self.inner.lock().expect("discard set lock poisoned");
        map.retain(|_, inserted| inserted.elapsed() < ENTRY_TTL);
        map.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("discard set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
