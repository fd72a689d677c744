//! Sendpath - pooled outbound packet delivery
//!
//! Per-client send paths for multi-client servers: fixed-size block pools
//! instead of per-message allocation, a FIFO handoff from producer threads
//! to one writer thread per client, and bounded, cooperative shutdown.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod send;
pub mod util;

pub use config::{Config, SendConfig};
pub use error::SendError;
pub use send::SendPath;

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
