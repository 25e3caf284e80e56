pub mod change;
pub mod config;
pub mod op;
pub mod wire;

pub use change::{Delta, DeltaEntry, Metadata};
pub use config::{ClientConfig, ServerConfig};
pub use op::{FileOperation, OpType};
pub use wire::{LongpollResponse, RevisionEntry, Token};
