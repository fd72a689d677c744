//! Send path errors
//!
//! Pool exhaustion is not an error: it surfaces as `None` / `false` from the
//! allocation helpers. Transport failures never reach producers either; they
//! are handled inside the writer loop.

use std::time::Duration;
use thiserror::Error;

use crate::connection::ClientId;

/// Errors surfaced to producers and to whoever drives the lifecycle
#[derive(Debug, Error)]
pub enum SendError {
    /// A copy or length exceeds the capacity of the block it targets
    #[error("{requested} bytes exceed block capacity of {capacity} bytes")]
    BoundaryViolation { requested: usize, capacity: usize },

    /// `offset + count` reaches past the end of the source slice
    #[error("source range {offset}..{offset}+{count} out of bounds for {available} bytes")]
    SourceRange {
        offset: usize,
        count: usize,
        available: usize,
    },

    /// Pool geometry or timeouts rejected by `SendConfig::validate`
    #[error("invalid send config: {0}")]
    InvalidConfig(String),

    #[error("send path for client {0} is already running")]
    AlreadyRunning(ClientId),

    #[error("failed to configure transport: {0}")]
    Transport(#[source] std::io::Error),

    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The writer did not exit, even after the transport was closed
    #[error("writer for client {client} did not stop within {waited:?}")]
    JoinTimeout { client: ClientId, waited: Duration },

    #[error("writer for client {0} panicked")]
    WorkerPanicked(ClientId),
}
