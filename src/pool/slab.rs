//! Size-classed block pool
//!
//! Two pre-allocated arenas (small and large) carved into equal blocks.
//! Free blocks are tracked in a bitset; claiming flips a bit with CAS, so
//! claims on different blocks never serialize on a lock.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::buffer::BufferHandle;
use crate::config::SendConfig;
use crate::metrics::METRICS;

/// Block size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Small,
    Large,
}

/// Contiguous storage for one size class plus its free bitset
struct Arena {
    data: Box<[UnsafeCell<u8>]>,
    /// Bitset tracking free blocks (1 = free, 0 = claimed)
    /// Each u64 tracks 64 blocks
    free_bitset: Box<[AtomicU64]>,
    claimed: AtomicUsize,
    block_size: usize,
    block_count: usize,
}

// SAFETY: the bytes of a block are only reached through the one
// `BufferHandle` that won the CAS for it, and blocks never overlap.
// Everything else in `Arena` is atomic or immutable.
unsafe impl Sync for Arena {}

impl Arena {
    fn new(block_size: usize, block_count: usize) -> Self {
        let num_words = (block_count + 63) / 64;
        let arena_len = block_size
            .checked_mul(block_count)
            .expect("arena size overflows usize");

        let data: Vec<UnsafeCell<u8>> = (0..arena_len)
            .map(|_| UnsafeCell::new(0))
            .collect();

        // All blocks free; bits past block_count stay 0 so they are never claimed
        let free_bitset: Vec<AtomicU64> = (0..num_words)
            .map(|i| AtomicU64::new(free_word(i, block_count)))
            .collect();

        Self {
            data: data.into_boxed_slice(),
            free_bitset: free_bitset.into_boxed_slice(),
            claimed: AtomicUsize::new(0),
            block_size,
            block_count,
        }
    }

    /// Claim the lowest free block
    fn claim(&self) -> Option<usize> {
        for (word_idx, word) in self.free_bitset.iter().enumerate() {
            let mut current = word.load(Ordering::Acquire);
            while current != 0 {
                let bit_idx = current.trailing_zeros() as usize;
                let mask = 1u64 << bit_idx;

                match word.compare_exchange(
                    current,
                    current & !mask,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.claimed.fetch_add(1, Ordering::Relaxed);
                        return Some(word_idx * 64 + bit_idx);
                    }
                    // Lost a race somewhere in this word, retry with what is free now
                    Err(actual) => current = actual,
                }
            }
        }

        None
    }

    fn release(&self, index: usize) {
        let mask = 1u64 << (index % 64);
        let previous = self.free_bitset[index / 64].fetch_or(mask, Ordering::Release);
        debug_assert_eq!(previous & mask, 0, "block {index} released twice");
        self.claimed.fetch_sub(1, Ordering::Relaxed);
    }

    fn reset(&mut self) {
        let block_count = self.block_count;
        for (i, word) in self.free_bitset.iter_mut().enumerate() {
            *word.get_mut() = free_word(i, block_count);
        }
        *self.claimed.get_mut() = 0;
    }

    fn block_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.block_count);
        UnsafeCell::raw_get(self.data[index * self.block_size..].as_ptr())
    }

    fn claimed(&self) -> usize {
        self.claimed.load(Ordering::Relaxed)
    }
}

/// Bitset word with every valid block of `word_idx` marked free
fn free_word(word_idx: usize, block_count: usize) -> u64 {
    let valid = block_count.saturating_sub(word_idx * 64).min(64);
    if valid == 64 {
        u64::MAX
    } else {
        (1u64 << valid) - 1
    }
}

/// Fixed-capacity pool of small and large blocks.
///
/// Capacity never grows: when a class is exhausted, [`SlabPool::claim`]
/// returns `None` and the caller drops the message.
pub struct SlabPool {
    small: Arena,
    large: Arena,
}

impl SlabPool {
    /// Create a pool with the geometry of `config`
    pub fn new(config: &SendConfig) -> Self {
        Self::with_geometry(
            config.small_block_size,
            config.small_block_count,
            config.large_block_size,
            config.large_block_count,
        )
    }

    /// Create a pool with explicit block sizes and counts.
    ///
    /// # Panics
    ///
    /// If `small_block_size` is 0 or not below `large_block_size`, or an
    /// arena size overflows `usize`. `SendPath` validates its
    /// `SendConfig` before building a pool, so only direct callers can hit
    /// this.
    pub fn with_geometry(
        small_block_size: usize,
        small_block_count: usize,
        large_block_size: usize,
        large_block_count: usize,
    ) -> Self {
        assert!(
            small_block_size > 0 && small_block_size < large_block_size,
            "small blocks must be non-empty and smaller than large blocks"
        );

        Self {
            small: Arena::new(small_block_size, small_block_count),
            large: Arena::new(large_block_size, large_block_count),
        }
    }

    /// Size class that serves a request of `size` bytes, if any
    pub fn class_for(&self, size: usize) -> Option<SizeClass> {
        if size <= self.small.block_size {
            Some(SizeClass::Small)
        } else if size <= self.large.block_size {
            Some(SizeClass::Large)
        } else {
            None
        }
    }

    /// Claim a block able to hold `size` bytes.
    ///
    /// Requests up to the small block size only ever use the small arena;
    /// an exhausted small arena does not spill into the large one.
    pub fn claim(self: &Arc<Self>, size: usize) -> Option<BufferHandle> {
        let class = self.class_for(size)?;

        match self.arena(class).claim() {
            Some(index) => {
                METRICS.buffer_claimed();
                Some(BufferHandle::new(Arc::clone(self), class, index, size))
            }
            None => {
                METRICS.claim_miss();
                trace!(?class, size, "block pool exhausted");
                None
            }
        }
    }

    /// Return a block to the free set. Only reached from `BufferHandle::drop`.
    pub(super) fn release(&self, class: SizeClass, index: usize) {
        self.arena(class).release(index);
        METRICS.buffer_released();
    }

    /// First byte of a block. Writing through it requires owning the block.
    pub(super) fn block_ptr(&self, class: SizeClass, index: usize) -> *mut u8 {
        self.arena(class).block_ptr(index)
    }

    /// Mark every block free again.
    ///
    /// Needs exclusive access, which also proves no handle into this pool
    /// is still alive.
    pub fn reset(&mut self) {
        self.small.reset();
        self.large.reset();
    }

    pub fn block_size(&self, class: SizeClass) -> usize {
        self.arena(class).block_size
    }

    pub fn block_count(&self, class: SizeClass) -> usize {
        self.arena(class).block_count
    }

    /// Largest request any block can satisfy
    pub fn max_block_size(&self) -> usize {
        self.large.block_size
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            small_claimed: self.small.claimed(),
            small_capacity: self.small.block_count,
            large_claimed: self.large.claimed(),
            large_capacity: self.large.block_count,
        }
    }

    fn arena(&self, class: SizeClass) -> &Arena {
        match class {
            SizeClass::Small => &self.small,
            SizeClass::Large => &self.large,
        }
    }
}

/// Block pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub small_claimed: usize,
    pub small_capacity: usize,
    pub large_claimed: usize,
    pub large_capacity: usize,
}

impl PoolStats {
    /// Blocks currently claimed across both classes
    pub fn claimed(&self) -> usize {
        self.small_claimed + self.large_claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    fn tiny_pool() -> Arc<SlabPool> {
        Arc::new(SlabPool::with_geometry(16, 2, 64, 1))
    }

    #[test]
    fn test_claim_release_reuse() {
        let pool = tiny_pool();

        let a = pool.claim(10).unwrap();
        let b = pool.claim(10).unwrap();
        assert_eq!(a.block_index(), 0);
        assert_eq!(b.block_index(), 1);
        assert_eq!(a.size_class(), SizeClass::Small);

        assert!(pool.claim(10).is_none()); // Exhausted

        drop(a);
        let d = pool.claim(10).unwrap();
        assert_eq!(d.block_index(), 0); // Reused slot
        assert_eq!(pool.stats().small_claimed, 2);
    }

    #[test]
    fn test_small_exhaustion_does_not_spill() {
        let pool = tiny_pool();
        let _a = pool.claim(16).unwrap();
        let _b = pool.claim(1).unwrap();

        assert!(pool.claim(16).is_none());
        assert_eq!(pool.stats().large_claimed, 0);
    }

    #[test]
    fn test_large_requests_skip_small() {
        let pool = tiny_pool();

        let big = pool.claim(17).unwrap();
        assert_eq!(big.size_class(), SizeClass::Large);
        assert_eq!(big.capacity(), 64);
        assert_eq!(pool.stats().small_claimed, 0);

        assert!(pool.claim(40).is_none());
        assert!(pool.claim(65).is_none()); // Larger than any block
    }

    #[test]
    fn test_exhaustion_then_release() {
        let pool = Arc::new(SlabPool::with_geometry(8, 130, 32, 4));

        // Spans three bitset words, the last one partial
        let mut held: Vec<_> = (0..130).map(|_| pool.claim(8).unwrap()).collect();
        assert!(pool.claim(8).is_none());

        let released = held.swap_remove(77);
        let index = released.block_index();
        drop(released);

        assert_eq!(pool.claim(8).unwrap().block_index(), index);
    }

    #[test]
    fn test_reset_frees_everything() {
        let mut pool = SlabPool::with_geometry(16, 2, 64, 1);
        pool.small.claim().unwrap();
        pool.small.claim().unwrap();
        pool.large.claim().unwrap();
        assert_eq!(pool.stats().claimed(), 3);

        pool.reset();
        assert_eq!(pool.stats().claimed(), 0);
        assert_eq!(pool.small.claim(), Some(0));
        assert_eq!(pool.large.claim(), Some(0));
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let pool = Arc::new(SlabPool::with_geometry(16, 8, 64, 2));
        let live = Arc::new(Mutex::new(HashSet::new()));

        let workers: Vec<_> = (0..8)
            .map(|t| {
                let pool = pool.clone();
                let live = live.clone();
                std::thread::spawn(move || {
                    for i in 0..2000 {
                        let size = if (i + t) % 5 == 0 { 40 } else { 10 };
                        if let Some(handle) = pool.claim(size) {
                            let key = (handle.size_class(), handle.block_index());
                            assert!(live.lock().insert(key), "block handed out twice");
                            live.lock().remove(&key);
                            drop(handle);
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(pool.stats().claimed(), 0);
    }

    #[test]
    #[should_panic(expected = "smaller than large blocks")]
    fn test_equal_block_sizes_panic() {
        SlabPool::with_geometry(64, 4, 64, 4);
    }

    #[test]
    #[should_panic(expected = "arena size overflows")]
    fn test_arena_overflow_panics() {
        SlabPool::with_geometry(16, usize::MAX / 2, 64, 1);
    }
}
