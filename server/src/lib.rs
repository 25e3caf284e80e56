pub mod api;
pub mod blob;
pub mod config;
pub mod error;
pub mod store;
pub mod wake;

pub use api::{build_router, serve, AppState};
pub use blob::BlobStore;
pub use config::CliConfig;
pub use error::ServerError;
pub use store::Store;
pub use wake::WakeRegistry;
