//! Long-poll loop.
//!
//! The listener owns no cursor of its own: it reads the current position
//! from a watch channel the worker updates after applying each delta. That
//! closes the loop described in the worker — a delta is only followed by
//! another poll once it has been fully applied (or given up on).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use models::Delta;

use crate::http::HttpClient;

const DELTA_RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct Listener {
    client: Arc<HttpClient>,
    deltas: mpsc::Sender<Delta>,
    cursor_rx: watch::Receiver<String>,
}

impl Listener {
    pub fn new(
        client: Arc<HttpClient>,
        deltas: mpsc::Sender<Delta>,
        cursor_rx: watch::Receiver<String>,
    ) -> Self {
        Self {
            client,
            deltas,
            cursor_rx,
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let cursor = self.cursor_rx.borrow_and_update().clone();
            debug!(%cursor, "polling for changes");
            let changes = tokio::select! {
                _ = token.cancelled() => break,
                result = self.client.poll(&cursor) => match result {
                    Ok(changes) => changes,
                    Err(e) => {
                        // A polling failure ends the loop; restart the client
                        // to resume.
                        error!(error = %e, "error while long polling, listener stopping");
                        break;
                    }
                },
            };
            // A delta applied while the poll was in flight restarted our
            // position; abandon this round.
            if *self.cursor_rx.borrow() != cursor {
                debug!("cursor changed during poll, restarting");
                continue;
            }
            if !changes {
                debug!("no new changes, polling again");
                continue;
            }

            let Some(delta) = self.fetch_delta(&cursor).await else {
                continue;
            };
            if self.deltas.send(delta).await.is_err() {
                break;
            }
            // Resume only once the worker has applied the delta and bumped
            // (or restated) the cursor.
            tokio::select! {
                _ = token.cancelled() => break,
                changed = self.cursor_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("listener stopped");
    }

    async fn fetch_delta(&self, cursor: &str) -> Option<Delta> {
        match self.client.get_delta(cursor).await {
            Ok(delta) => Some(delta),
            Err(e) => {
                warn!(cursor, error = %e, "failed to fetch delta, retrying in 3s");
                tokio::time::sleep(DELTA_RETRY_DELAY).await;
                match self.client.get_delta(cursor).await {
                    Ok(delta) => Some(delta),
                    Err(e) => {
                        error!(cursor, error = %e, "failed to fetch delta, giving up this round");
                        None
                    }
                }
            }
        }
    }
}
