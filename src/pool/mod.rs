//! Memory pool management
//!
//! Pre-allocated block arenas for zero-allocation outbound buffers.

mod buffer;
mod slab;

pub use buffer::BufferHandle;
pub use slab::{PoolStats, SizeClass, SlabPool};
