//! Claimed block handle
//!
//! A `BufferHandle` is the only way to reach the bytes of a claimed block.
//! It moves from the producer into the send queue and on to the writer;
//! dropping it releases the block, so every claim is released exactly once.

use std::fmt;
use std::sync::Arc;

use super::slab::{SizeClass, SlabPool};
use crate::error::SendError;

/// Exclusive ownership of one pool block
pub struct BufferHandle {
    pool: Arc<SlabPool>,
    class: SizeClass,
    index: usize,
    len: usize,
}

impl BufferHandle {
    pub(super) fn new(pool: Arc<SlabPool>, class: SizeClass, index: usize, len: usize) -> Self {
        Self {
            pool,
            class,
            index,
            len,
        }
    }

    pub fn size_class(&self) -> SizeClass {
        self.class
    }

    pub fn block_index(&self) -> usize {
        self.index
    }

    /// Byte offset of this block inside its arena
    pub fn offset(&self) -> usize {
        self.index * self.capacity()
    }

    /// Block size of this handle's class
    pub fn capacity(&self) -> usize {
        self.pool.block_size(self.class)
    }

    /// Number of meaningful bytes at the front of the block
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the payload length, rejecting anything past the block
    pub fn set_len(&mut self, len: usize) -> Result<(), SendError> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(SendError::BoundaryViolation {
                requested: len,
                capacity,
            });
        }
        self.len = len;
        Ok(())
    }

    /// Whole block, `capacity()` bytes
    pub fn as_slice(&self) -> &[u8] {
        let ptr = self.pool.block_ptr(self.class, self.index);
        // SAFETY: this handle owns the block; nobody else can write to it
        // while `&self` is borrowed, and the Arc keeps the arena alive.
        unsafe { std::slice::from_raw_parts(ptr, self.capacity()) }
    }

    /// Whole block, writable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let ptr = self.pool.block_ptr(self.class, self.index);
        // SAFETY: as above, and `&mut self` makes this the only live view.
        unsafe { std::slice::from_raw_parts_mut(ptr, self.capacity()) }
    }

    /// The first `len()` bytes
    pub fn payload(&self) -> &[u8] {
        &self.as_slice()[..self.len]
    }

    /// Copy `src` to the front of the block and set the length to match.
    ///
    /// Fails without touching the block if `src` does not fit.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<(), SendError> {
        let capacity = self.capacity();
        if src.len() > capacity {
            return Err(SendError::BoundaryViolation {
                requested: src.len(),
                capacity,
            });
        }
        self.as_mut_slice()[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }

    /// Give the block back to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.pool.release(self.class, self.index);
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("class", &self.class)
            .field("index", &self.index)
            .field("offset", &self.offset())
            .field("len", &self.len)
            .finish()
    }
}
