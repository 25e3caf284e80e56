//! The worker applies changes in both directions.
//!
//! Two consumer tasks share one `Worker`: one drains the operations channel
//! (local changes going out), the other drains the deltas channel (remote
//! changes coming in). Echo suppression is split between `is_new_operation`
//! (drops watcher events that merely restate what the state DB already
//! records) and the discard set (swallows the filesystem echo of our own
//! rename-into-place).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use models::{Delta, FileOperation, Metadata, OpType};
use toolkit::{normalize_path, parent_dir};

use crate::discard::DiscardSet;
use crate::fsmeta::{local_path, wire_path_with_name};
use crate::http::HttpClient;
use crate::state::{FileState, StateDb};

pub struct Worker {
    state: Arc<Mutex<StateDb>>,
    client: Arc<HttpClient>,
    work_dir: PathBuf,
    cache_dir: PathBuf,
    discard: DiscardSet,
    cursor_tx: watch::Sender<String>,
}

impl Worker {
    pub fn new(
        state: Arc<Mutex<StateDb>>,
        client: Arc<HttpClient>,
        work_dir: PathBuf,
        cache_dir: PathBuf,
        discard: DiscardSet,
        cursor_tx: watch::Sender<String>,
    ) -> Self {
        Self {
            state,
            client,
            work_dir,
            cache_dir,
            discard,
            cursor_tx,
        }
    }

    /// First-start seeding: with no stored cursor, fetch the full state and
    /// record every entry as known-but-not-materialized.
    pub async fn init_db(state: &Mutex<StateDb>, client: &HttpClient) -> Result<()> {
        {
            let db = state.lock().await;
            if !db.get_cfg_value("cursor")?.is_empty() {
                return Ok(());
            }
        }
        let delta = client.get_delta("").await.context("fetching initial state")?;
        let db = state.lock().await;
        for (path, metadata) in delta.changes() {
            if let Some(meta) = metadata {
                db.add_file(path, meta, false)?;
            }
        }
        db.set_cfg_value("cursor", &delta.cursor)?;
        info!(cursor = %delta.cursor, "initialized state from server snapshot");
        Ok(())
    }

    /// Startup reconciliation: push up everything that never reached the
    /// server, then pull down everything whose content is missing locally.
    pub async fn sync(&self) -> Result<()> {
        info!("worker syncing");
        let not_uploaded = { self.state.lock().await.get_not_uploaded_files()? };
        for file in not_uploaded {
            debug!(path = %file.path, "found entry never uploaded");
            let local = local_path(&self.work_dir, &file.path, &file.name);
            if file.is_dir {
                self.create_remote_directory(&file.metadata()).await?;
            } else {
                self.create_remote_file(&local, &file.metadata()).await?;
            }
        }

        let unsynced = { self.state.lock().await.get_unsynced_files()? };
        for file in unsynced {
            debug!(path = %file.path, "found entry not yet materialized");
            self.create_local_file(&file.path).await?;
        }
        Ok(())
    }

    /// Spawn the two channel consumers.
    pub fn spawn_consumers(
        self: &Arc<Self>,
        operations: mpsc::Receiver<FileOperation>,
        deltas: mpsc::Receiver<Delta>,
        token: CancellationToken,
    ) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let ops_worker = Arc::clone(self);
        let ops_token = token.clone();
        let ops_handle = tokio::spawn(async move { ops_worker.run_operations(operations, ops_token).await });

        let delta_worker = Arc::clone(self);
        let delta_handle = tokio::spawn(async move { delta_worker.run_deltas(deltas, token).await });
        (ops_handle, delta_handle)
    }

    async fn run_operations(
        &self,
        mut operations: mpsc::Receiver<FileOperation>,
        token: CancellationToken,
    ) {
        debug!("worker waiting for operations");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                op = operations.recv() => match op {
                    Some(op) => self.handle_file_op(op).await,
                    None => break,
                },
            }
        }
    }

    async fn run_deltas(&self, mut deltas: mpsc::Receiver<Delta>, token: CancellationToken) {
        debug!("worker waiting for deltas");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                delta = deltas.recv() => match delta {
                    Some(delta) => self.handle_delta(delta).await,
                    None => break,
                },
            }
        }
    }

    /* Outgoing: local operations to the server */

    pub async fn handle_file_op(&self, op: FileOperation) {
        debug!(op = ?op.op, path = %op.path.display(), "worker received operation");
        if !self.is_new_operation(&op).await {
            debug!(path = %op.attributes.path, "operation already reflected in state");
            return;
        }
        let result = match op.op {
            OpType::Create | OpType::Modify => {
                if op.attributes.is_dir {
                    self.create_remote_directory(&op.attributes).await
                } else {
                    self.create_remote_file(&op.path, &op.attributes).await
                }
            }
            OpType::Delete => self.remove_remote(&op.attributes.path).await,
        };
        // Failures are logged and dropped; the next walk or event re-raises
        // the operation.
        if let Err(e) = result {
            error!(path = %op.path.display(), error = %e, "failed to apply outgoing operation");
        }
    }

    /// Whether an operation describes something the state DB does not
    /// already record. Echoes of freshly applied deltas fail this test.
    async fn is_new_operation(&self, op: &FileOperation) -> bool {
        let file = match self.state.lock().await.get_file_by_path(&op.attributes.path) {
            Ok(f) => f,
            Err(e) => {
                error!(path = %op.attributes.path, error = %e, "state lookup failed");
                return true;
            }
        };
        let Some(file) = file else {
            return op.op != OpType::Delete;
        };
        if op.op == OpType::Delete {
            return true;
        }
        if op.attributes.name != file.name {
            return true;
        }
        if op.attributes.is_dir && file.is_dir {
            // Two directories at the same path are never new.
            return false;
        }
        if op.attributes.is_dir != file.is_dir {
            return true;
        }
        if op.attributes.size != file.size {
            return true;
        }
        op.attributes.hash != file.hash
    }

    async fn create_remote_directory(&self, meta: &Metadata) -> Result<()> {
        self.apply_metadata(&meta.path, meta, true).await?;
        let wire_path = wire_path_with_name(&meta.path, &meta.name);
        let new_meta = self.client.mkdir(&wire_path).await?;
        self.apply_metadata(&normalize_path(&new_meta.path), &new_meta, true)
            .await?;
        info!(path = %meta.path, "directory created on server");
        Ok(())
    }

    async fn create_remote_file(&self, local: &Path, meta: &Metadata) -> Result<()> {
        self.apply_metadata(&meta.path, meta, true).await?;
        let wire_path = wire_path_with_name(&meta.path, &meta.name);
        let new_meta = self.client.upload(local, &wire_path).await?;
        self.apply_metadata(&normalize_path(&new_meta.path), &new_meta, true)
            .await?;
        info!(path = %meta.path, rev = new_meta.rev, "uploaded");
        Ok(())
    }

    async fn remove_remote(&self, server_path: &str) -> Result<()> {
        self.client.remove(server_path).await?;
        info!(path = %server_path, "removed on server");
        Ok(())
    }

    /* Incoming: server deltas to local disk */

    pub async fn handle_delta(&self, delta: Delta) {
        debug!(cursor = %delta.cursor, entries = delta.entries.len(), "worker received delta");
        if delta.reset {
            // Reset deltas only ever arrive into an empty database (initial
            // seeding), so there is no local state to drop.
            info!("received reset delta, keeping local state");
        }
        let mut failed = 0usize;
        for (path, metadata) in delta.changes() {
            if !self.is_new_entry(path, metadata).await {
                debug!(path, "delta entry already in state");
                continue;
            }
            let result = match metadata {
                None => self.remove_local(path).await,
                Some(meta) => match self.apply_metadata(path, meta, false).await {
                    Ok(()) => self.create_local_file(path).await,
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = result {
                failed += 1;
                error!(path, error = %e, "failed to apply delta entry");
            }
        }

        // The cursor only advances when every entry applied; otherwise the
        // listener resumes from the old cursor and the next poll retries.
        let resume = if failed == 0 {
            let db = self.state.lock().await;
            if let Err(e) = db.set_cfg_value("cursor", &delta.cursor) {
                error!(error = %e, "failed to persist cursor");
            }
            delta.cursor.clone()
        } else {
            warn!(failed, "delta partially applied, keeping old cursor");
            self.stored_cursor().await
        };
        let _ = self.cursor_tx.send(resume);
    }

    pub async fn stored_cursor(&self) -> String {
        let cursor = self
            .state
            .lock()
            .await
            .get_cfg_value("cursor")
            .unwrap_or_default();
        if cursor.is_empty() {
            "0".to_string()
        } else {
            cursor
        }
    }

    /// Whether a delta entry changes anything locally. The server wakes the
    /// originating session too; entries describing our own uploads match the
    /// state DB and are skipped here.
    async fn is_new_entry(&self, path: &str, metadata: Option<&Metadata>) -> bool {
        let file = match self.state.lock().await.get_file_by_path(path) {
            Ok(f) => f,
            Err(e) => {
                error!(path, error = %e, "state lookup failed");
                return true;
            }
        };
        let Some(file) = file else {
            return metadata.is_some();
        };
        let Some(metadata) = metadata else {
            return true;
        };
        metadata.name != file.name || metadata.size != file.size || metadata.hash != file.hash
    }

    /// Write server metadata into the state DB, rotating the previous
    /// revision into `parent_revision`.
    async fn apply_metadata(&self, path: &str, metadata: &Metadata, synced: bool) -> Result<()> {
        let db = self.state.lock().await;
        let mut file = db.get_file_by_path(path)?.unwrap_or_default();
        if file.current_revision != 0 {
            file.parent_revision = file.current_revision;
        }
        file.path = if metadata.path.is_empty() {
            path.to_string()
        } else {
            normalize_path(&metadata.path)
        };
        file.parent = parent_dir(&file.path);
        file.name = metadata.name.clone();
        file.is_dir = metadata.is_dir;
        file.is_removed = false;
        file.size = metadata.size;
        file.hash = metadata.hash.clone();
        file.modification_time = metadata.modified;
        file.current_revision = metadata.rev;
        file.synced = synced;
        db.save(&file)?;
        Ok(())
    }

    /// Materialize the entry at `path` onto disk. Directories are created in
    /// place; files are downloaded into the cache dir, verified against the
    /// expected size, and renamed into place with the target registered in
    /// the discard set first.
    pub async fn create_local_file(&self, path: &str) -> Result<()> {
        let file = {
            self.state
                .lock()
                .await
                .get_file_by_path(path)?
                .with_context(|| format!("no state row for {path}"))?
        };
        let target = local_path(&self.work_dir, &file.path, &file.name);

        if file.is_dir {
            tokio::fs::create_dir_all(&target).await?;
            self.state.lock().await.mark_synced(path)?;
            debug!(path, "folder created locally");
            return Ok(());
        }

        let tmp = self.cache_dir.join(Uuid::new_v4().to_string());
        let downloaded = self.download_to(&file, &tmp).await;
        let written = match downloaded {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        if written != file.size {
            let _ = tokio::fs::remove_file(&tmp).await;
            bail!(
                "size mismatch downloading {path}: got {written}, expected {}",
                file.size
            );
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.discard.insert(target.clone());
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("renaming into {}", target.display()))?;
        self.state.lock().await.mark_synced(path)?;
        debug!(path, rev = file.current_revision, "file materialized locally");
        Ok(())
    }

    async fn download_to(&self, file: &FileState, tmp: &Path) -> Result<i64> {
        let mut resp = self.client.get_file(&file.path, file.current_revision).await?;
        let mut out = tokio::fs::File::create(tmp)
            .await
            .with_context(|| format!("creating cache file {}", tmp.display()))?;
        let mut written: i64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as i64;
        }
        out.flush().await?;
        Ok(written)
    }

    /// Apply a tombstone entry: delete the local file or tree and forget the
    /// state rows. The target goes into the discard set first so the watcher
    /// swallows the resulting Remove event.
    pub async fn remove_local(&self, path: &str) -> Result<()> {
        let Some(file) = ({ self.state.lock().await.get_file_by_path(path)? }) else {
            return Ok(());
        };
        let target = local_path(&self.work_dir, &file.path, &file.name);
        self.discard.insert(target.clone());
        let removal = if file.is_dir {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        match removal {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.state.lock().await.remove_all(path)?;
        info!(path, "removed locally");
        Ok(())
    }
}
