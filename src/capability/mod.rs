//! Capability layer: line-delimited JSON over stdio to capability servers.
//!
//! This module handles:
//! - Spawning capability server processes and shutting them down
//! - One serialized request/response link per capability
//! - Tool discovery with a declarative contract-table fallback
//! - The registry of running links
//! - Auto-discovery of server scripts on disk

pub mod contract;
pub mod discovery;
pub mod errors;
pub mod link;
pub mod process;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use errors::CapabilityError;
pub use link::CapabilityLink;
pub use registry::CapabilityRegistry;
pub use types::CapabilityConfig;
