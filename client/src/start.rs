//! Client startup wiring.
//!
//! Order matters here: consumers start before the walk so the bounded
//! operations channel cannot fill up and stall it, and live watching plus
//! long polling only begin once startup reconciliation has finished.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use models::ClientConfig;

use crate::discard::DiscardSet;
use crate::http::HttpClient;
use crate::listener::Listener;
use crate::state::StateDb;
use crate::watcher::Watcher;
use crate::worker::Worker;

/// Download staging area under the work dir, excluded from watching.
pub const CACHE_DIR_NAME: &str = ".cloudsyncer_cache";

const CHANNEL_CAPACITY: usize = 100;

pub async fn run(cfg: ClientConfig) -> Result<()> {
    std::fs::create_dir_all(&cfg.config_dir)
        .with_context(|| format!("creating config dir {}", cfg.config_dir.display()))?;
    toolkit::init_logging(&cfg.log_path())?;
    info!("starting cloudsyncer client");

    let state = StateDb::open(&cfg.db_path())
        .with_context(|| format!("opening state db {}", cfg.db_path().display()))?;

    let work_dir = resolve_work_dir(&state, &cfg)?;
    let cache_dir = work_dir.join(CACHE_DIR_NAME);
    std::fs::create_dir_all(&cache_dir)?;

    let (username, token) = resolve_credentials(&state, &cfg).await?;
    let client = Arc::new(HttpClient::new(&cfg.server_url, username, token)?);
    let state = Arc::new(Mutex::new(state));

    Worker::init_db(&state, &client).await?;

    let stored_cursor = {
        let db = state.lock().await;
        let cursor = db.get_cfg_value("cursor")?;
        if cursor.is_empty() {
            "0".to_string()
        } else {
            cursor
        }
    };

    let discard = DiscardSet::new();
    let (operations_tx, operations_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (deltas_tx, deltas_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (cursor_tx, cursor_rx) = watch::channel(stored_cursor);

    let worker = Arc::new(Worker::new(
        state.clone(),
        client.clone(),
        work_dir.clone(),
        cache_dir.clone(),
        discard.clone(),
        cursor_tx,
    ));

    let shutdown = CancellationToken::new();
    worker.spawn_consumers(operations_rx, deltas_rx, shutdown.clone());

    let watcher = Watcher::new(
        work_dir.clone(),
        cache_dir,
        operations_tx,
        discard,
        state.clone(),
    );
    watcher.initial_walk().await.context("initial walk")?;
    worker.sync().await.context("startup sync")?;
    watcher.spawn(shutdown.clone());

    let listener = Listener::new(client, deltas_tx, cursor_rx);
    tokio::spawn(listener.run(shutdown.clone()));

    info!(work_dir = %work_dir.display(), "cloudsyncer started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    Ok(())
}

fn resolve_work_dir(state: &StateDb, cfg: &ClientConfig) -> Result<PathBuf> {
    let stored = state.get_cfg_value("work_dir")?;
    if !stored.is_empty() {
        let stored = PathBuf::from(stored);
        if stored.is_dir() {
            if let Some(flag) = &cfg.work_dir {
                if *flag != stored {
                    warn!(
                        stored = %stored.display(),
                        requested = %flag.display(),
                        "ignoring --workdir, a work dir is already configured"
                    );
                }
            }
            return Ok(stored);
        }
        warn!(stored = %stored.display(), "configured work dir is gone, reconfiguring");
    }
    let Some(work_dir) = cfg.work_dir.clone() else {
        bail!("no work dir configured; pass --workdir on first run");
    };
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("creating work dir {}", work_dir.display()))?;
    state.set_cfg_value("work_dir", &work_dir.to_string_lossy())?;
    Ok(work_dir)
}

/// Use the stored session if there is one; otherwise log in (registering on
/// the way if the account does not exist yet) and persist the session.
async fn resolve_credentials(state: &StateDb, cfg: &ClientConfig) -> Result<(String, String)> {
    let stored_username = state.get_cfg_value("username")?;
    let stored_token = state.get_cfg_value("authencity_token")?;
    if !stored_username.is_empty() && !stored_token.is_empty() {
        return Ok((stored_username, stored_token));
    }

    let Some(username) = cfg.username.clone() else {
        bail!("no stored session; pass --username and --password on first run");
    };
    let Some(password) = cfg.password.clone() else {
        bail!("no stored session; pass --password on first run");
    };

    let token = match HttpClient::login(&cfg.server_url, &username, &password, &cfg.computer_name)
        .await
    {
        Ok(token) => token,
        Err(login_err) => {
            info!(%username, "login failed, trying to register");
            HttpClient::register(&cfg.server_url, &username, &password, &cfg.computer_name)
                .await
                .with_context(|| format!("login failed ({login_err}) and registration failed"))?
        }
    };

    state.set_cfg_value("username", &username)?;
    state.set_cfg_value("authencity_token", &token)?;
    state.set_cfg_value("computer_name", &cfg.computer_name)?;
    info!(%username, "session established");
    Ok((username, token))
}
