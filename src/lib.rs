pub mod types;
pub mod error;
pub mod budget;
pub mod config;
pub mod data;
pub mod sources;
pub mod sync;
pub mod time;
pub mod utils;

pub use types::*;
pub use error::{Result, SyncError};
pub use config::SyncConfig;
