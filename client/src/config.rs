use std::path::PathBuf;

use clap::Parser;
use models::ClientConfig;

#[derive(Debug, Parser)]
#[command(name = "cloudsyncer", about = "CloudSyncer client")]
pub struct CliConfig {
    /// Config directory override (defaults to ~/.cloudsyncer)
    #[arg(long = "cfgdir")]
    pub cfgdir: Option<PathBuf>,

    /// Server base URL
    #[arg(long, default_value = "http://localhost:9999")]
    pub server: String,

    /// Directory to keep in sync; persisted after first run
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Account name; persisted after first login
    #[arg(long)]
    pub username: Option<String>,

    /// Account password; only needed until a session token is stored
    #[arg(long)]
    pub password: Option<String>,

    /// Name this computer reports to the server
    #[arg(long)]
    pub computer_name: Option<String>,
}

impl CliConfig {
    pub fn into_client_config(self) -> ClientConfig {
        let computer_name = self.computer_name.unwrap_or_else(|| {
            hostname::get()
                .unwrap_or_else(|_| "unknown-pc".into())
                .to_string_lossy()
                .into_owned()
        });
        ClientConfig {
            server_url: self.server,
            config_dir: self.cfgdir.unwrap_or_else(default_config_dir),
            work_dir: self.workdir,
            username: self.username,
            password: self.password,
            computer_name,
        }
    }
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".cloudsyncer")
}
