use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use models::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "cloudsyncer-server", about = "CloudSyncer sync server")]
pub struct CliConfig {
    /// Address and port to listen on
    #[arg(long, default_value = "0.0.0.0:9999")]
    pub listen_addr: SocketAddr,

    /// Path to the metadata SQLite DB
    #[arg(long, default_value = "cloudsyncer.db")]
    pub db_path: PathBuf,

    /// Directory holding content blobs
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Path to the log file
    #[arg(long, default_value = "cloudsyncer-server.log")]
    pub log_path: PathBuf,

    /// Seconds a longpoll_delta request blocks before reporting no changes
    #[arg(long, default_value_t = 60)]
    pub longpoll_timeout_secs: u64,
}

impl CliConfig {
    pub fn into_server_config(self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.listen_addr,
            db_path: self.db_path,
            data_dir: self.data_dir,
            log_path: self.log_path,
            longpoll_timeout_secs: self.longpoll_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CliConfig;
    use clap::Parser;

    #[test]
    fn defaults_resolve() {
        let cfg = CliConfig::parse_from(["cloudsyncer-server"]).into_server_config();
        assert_eq!(cfg.listen_addr.port(), 9999);
        assert_eq!(cfg.longpoll_timeout_secs, 60);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = CliConfig::parse_from([
            "cloudsyncer-server",
            "--listen-addr",
            "127.0.0.1:8080",
            "--longpoll-timeout-secs",
            "5",
        ])
        .into_server_config();
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.longpoll_timeout_secs, 5);
    }
}
