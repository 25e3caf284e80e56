use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Root of the blob store; blobs live under `<data_dir>/<shard>/<uuid>`.
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    /// How long `/longpoll_delta` blocks before answering `changes:false`.
    pub longpoll_timeout_secs: u64,
}

/// Resolved client configuration. Credentials and the work dir are persisted
/// in the state database after first run; the CLI values only seed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Directory holding the state database and log file.
    pub config_dir: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub computer_name: String,
}

impl ClientConfig {
    pub fn db_path(&self) -> PathBuf {
        self.config_dir.join("cloudsyncer.db")
    }

    pub fn log_path(&self) -> PathBuf {
        self.config_dir.join("cloudsyncer.log")
    }
}
