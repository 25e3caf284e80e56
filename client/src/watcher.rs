//! Filesystem watching.
//!
//! Phase one walks the work dir once and reconciles it against the state
//! database, emitting operations for anything created or modified while the
//! client was not running. Phase two bridges notify events from a blocking
//! thread onto the operations channel, suppressing echoes of the worker's
//! own materializations via the discard set.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use models::{FileOperation, Metadata, OpType};
use toolkit::retry_io;

use crate::discard::DiscardSet;
use crate::fsmeta::{local_metadata, server_rel_path};
use crate::state::StateDb;

const RETRY_ATTEMPTS: usize = 5;
const RETRY_DELAY_MS: u64 = 100;

pub struct Watcher {
    work_dir: PathBuf,
    cache_dir: PathBuf,
    operations: mpsc::Sender<FileOperation>,
    discard: DiscardSet,
    state: Arc<Mutex<StateDb>>,
}

impl Watcher {
    pub fn new(
        work_dir: PathBuf,
        cache_dir: PathBuf,
        operations: mpsc::Sender<FileOperation>,
        discard: DiscardSet,
        state: Arc<Mutex<StateDb>>,
    ) -> Self {
        Self {
            work_dir,
            cache_dir,
            operations,
            discard,
            state,
        }
    }

    /// Walk the work dir once and emit operations for paths the state
    /// database does not know, or knows with older content.
    pub async fn initial_walk(&self) -> Result<()> {
        let cache_dir = self.cache_dir.clone();
        let walker = WalkDir::new(&self.work_dir)
            .into_iter()
            .filter_entry(move |e| e.path() != cache_dir);
        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            if path == self.work_dir {
                continue;
            }
            let meta = match local_metadata(&self.work_dir, path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable path in walk");
                    continue;
                }
            };
            let known = { self.state.lock().await.get_file_by_path(&meta.path)? };
            match known {
                None => {
                    debug!(path = %path.display(), "new path found during walk");
                    let op = FileOperation::new(OpType::Create, path.to_path_buf(), meta);
                    self.operations.send(op).await?;
                }
                Some(db_file) => {
                    if db_file.modification_time >= meta.modified || meta.is_dir {
                        continue;
                    }
                    if db_file.size == meta.size && db_file.hash == meta.hash {
                        // Content unchanged; only the timestamp drifted.
                        self.state
                            .lock()
                            .await
                            .update_modification_time(&meta.path, meta.modified)?;
                        continue;
                    }
                    debug!(path = %path.display(), "content changed during downtime");
                    let mut attributes = meta;
                    attributes.rev = db_file.current_revision;
                    let op = FileOperation::new(OpType::Modify, path.to_path_buf(), attributes);
                    self.operations.send(op).await?;
                }
            }
        }
        Ok(())
    }

    /// Run the live notify loop on a blocking thread until cancellation.
    pub fn spawn(self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.watch_blocking(token))
    }

    fn watch_blocking(&self, token: CancellationToken) {
        let (tx_notify, rx_notify) = std_mpsc::channel();
        let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
            let _ = tx_notify.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                error!(path = %self.work_dir.display(), error = %e, "failed to create watcher");
                return;
            }
        };
        if let Err(e) = watcher.watch(&self.work_dir, RecursiveMode::Recursive) {
            error!(path = %self.work_dir.display(), error = %e, "failed to watch work dir");
            return;
        }
        info!(path = %self.work_dir.display(), "watching work dir");

        loop {
            if token.is_cancelled() {
                break;
            }
            let event = match rx_notify.recv_timeout(Duration::from_millis(500)) {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    error!(error = %e, "watch error");
                    continue;
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("watcher channel closed");
                    break;
                }
            };
            self.handle_event(event);
        }
        info!("watcher stopped");
    }

    fn handle_event(&self, event: notify::Event) {
        if let EventKind::Modify(ModifyKind::Name(mode)) = &event.kind {
            match mode {
                RenameMode::Both => {
                    if let Some(from) = event.paths.first() {
                        self.on_removed(from);
                    }
                    if let Some(to) = event.paths.get(1) {
                        self.on_renamed_to(to);
                    }
                }
                RenameMode::From => {
                    if let Some(from) = event.paths.first() {
                        self.on_removed(from);
                    }
                }
                RenameMode::To => {
                    if let Some(to) = event.paths.first() {
                        self.on_renamed_to(to);
                    }
                }
                _ => {
                    // Backends that do not say which side this is: decide by
                    // whether the path still exists.
                    for path in &event.paths {
                        if path.exists() {
                            self.on_renamed_to(path);
                        } else {
                            self.on_removed(path);
                        }
                    }
                }
            }
            return;
        }

        for path in &event.paths {
            match event.kind {
                EventKind::Create(_) => self.on_created(path),
                EventKind::Remove(_) => self.on_removed(path),
                EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                    self.on_modified(path)
                }
                // Chmod and other metadata-only events are ignored.
                _ => {}
            }
        }
    }

    fn excluded(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || *path == self.work_dir || path.starts_with(&self.cache_dir)
    }

    fn on_created(&self, path: &Path) {
        if self.excluded(path) {
            return;
        }
        self.emit(OpType::Create, path);
    }

    fn on_modified(&self, path: &Path) {
        if self.excluded(path) {
            return;
        }
        self.emit(OpType::Modify, path);
    }

    /// Remove or rename-away: the one place remote-echo suppression applies.
    fn on_removed(&self, path: &Path) {
        if self.excluded(path) {
            return;
        }
        if self.discard.take(path) {
            debug!(path = %path.display(), "discarding remove echo");
            return;
        }
        let Some(rel) = server_rel_path(&self.work_dir, path) else {
            return;
        };
        let attributes = removed_metadata(path, rel);
        let op = FileOperation::new(OpType::Delete, path.to_path_buf(), attributes);
        self.send(op);
    }

    /// The target side of a rename. A rename into place by our own worker is
    /// an echo and carries a discard entry.
    fn on_renamed_to(&self, path: &Path) {
        if self.excluded(path) {
            return;
        }
        if self.discard.take(path) {
            debug!(path = %path.display(), "discarding rename echo");
            return;
        }
        self.emit(OpType::Create, path);
    }

    fn emit(&self, op_type: OpType, path: &Path) {
        let attributes = match retry_io(path, RETRY_ATTEMPTS, RETRY_DELAY_MS, || {
            local_metadata(&self.work_dir, path)
        }) {
            Ok(meta) => meta,
            Err(e) => {
                // The path vanished between event and stat; report it as
                // removed so the worker can decide.
                debug!(path = %path.display(), error = %e, "metadata read failed for event");
                match server_rel_path(&self.work_dir, path) {
                    Some(rel) => removed_metadata(path, rel),
                    None => return,
                }
            }
        };
        debug!(path = %path.display(), ?op_type, "filesystem event");
        self.send(FileOperation::new(op_type, path.to_path_buf(), attributes));
    }

    fn send(&self, op: FileOperation) {
        if let Err(e) = self.operations.blocking_send(op) {
            error!(error = %e, "failed to queue operation");
        }
    }
}

fn removed_metadata(path: &Path, rel: String) -> Metadata {
    Metadata {
        is_removed: true,
        modified: OffsetDateTime::now_utc().unix_timestamp(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: rel,
        ..Default::default()
    }
}
