pub mod config;
pub mod discard;
pub mod fsmeta;
pub mod http;
pub mod listener;
pub mod start;
pub mod state;
pub mod watcher;
pub mod worker;

pub use config::CliConfig;
pub use discard::DiscardSet;
pub use http::HttpClient;
pub use listener::Listener;
pub use state::{FileState, StateDb};
pub use watcher::Watcher;
pub use worker::Worker;
