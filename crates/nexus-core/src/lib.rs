pub mod config;
pub mod error;
pub mod types;

pub use config::NexusConfig;
pub use error::{NexusError, Result};
