pub mod auth;
pub mod routes;
pub mod tools;

pub use routes::{router, BridgeState};
pub use tools::{ToolAdapter, ToolError, ToolRegistry};
