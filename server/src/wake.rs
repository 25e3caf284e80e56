//! Wake channels for long-polling clients.
//!
//! Every `/longpoll_delta` request that finds no pending changes registers a
//! one-shot channel here. Mutation handlers call [`WakeRegistry::notify`]
//! after their transaction commits, which drains and fires every channel for
//! that user. The originating session is woken along with the rest; the
//! client's own new-entry check absorbs the echo.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct WakeRegistry {
    inner: Mutex<HashMap<i64, Vec<oneshot::Sender<()>>>>,
}

impl WakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: i64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("wake registry lock poisoned")
            .entry(user_id)
            .or_default()
            .push(tx);
        rx
    }

    /// Fire-and-forget wake for every poller of `user_id`. Receivers that
    /// already timed out are silently skipped.
    pub fn notify(&self, user_id: i64) {
        let senders = self
            .inner
            .lock()
            .expect("wake registry lock poisoned")
            .remove(&user_id)
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.send(());
        }
    }

    pub fn waiting(&self, user_id: i64) -> usize {
        self.inner
            .lock()
            .expect("wake registry lock poisoned")
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}
