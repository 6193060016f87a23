pub mod error;
pub mod mcp;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod tasks;
