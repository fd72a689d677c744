//! Outbound send path
//!
//! Queueing and transmission of pooled buffers, one writer thread per client.

mod path;
mod queue;
mod writer;

pub use path::{SendPath, SendPathBuilder};
pub use queue::SendQueue;
pub use writer::{FailureHook, WriteError, WriteFailure, WriterState};
