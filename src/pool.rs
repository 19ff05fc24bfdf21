//! Size-tiered recycling pool for block decode buffers
//!
//! Every block decode rents large scratch buffers (up to several megabytes)
//! for its copy, decompress, and decrypt stages. Recycling those buffers by
//! length class keeps steady-state decode traffic off the allocator. Buffers
//! are grouped into a small set of fixed-size tiers; each tier keeps a bounded
//! stack of free buffers and hands the most recently returned one out first.
//! Requests above the largest tier, or against an exhausted tier, fall back to
//! plain allocations that are dropped instead of recycled.

use std::ops::{Deref, DerefMut};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Buffer length and slot count per tier, smallest first.
const BUCKET_CONFIG: &[(usize, usize)] = &[
    (128 * 1024, 8),
    (512 * 1024, 6),
    (1024 * 1024, 4),
    (4 * 1024 * 1024, 2),
];

static SHARED_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// One size class: a bounded stack of equal-length free buffers.
#[derive(Debug)]
struct Bucket {
    buffer_len: usize,
    capacity: usize,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Returned buffers awaiting reuse, most recently returned last.
    free: Vec<Vec<u8>>,
    /// Count of buffers currently rented out.
    live: usize,
}

impl Bucket {
    fn new(buffer_len: usize, capacity: usize) -> Self {
        Bucket {
            buffer_len,
            capacity,
            state: Mutex::new(BucketState {
                free: Vec::with_capacity(capacity),
                live: 0,
            }),
        }
    }

    /// Takes a buffer from this tier, or `None` if every slot is rented out.
    /// Fresh allocations happen outside the lock; the lock only covers the
    /// slot bookkeeping.
    fn rent(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if let Some(buf) = state.free.pop() {
            state.live += 1;
            return Some(buf);
        }
        if state.live == self.capacity {
            return None;
        }
        state.live += 1;
        drop(state);
        Some(vec![0u8; self.buffer_len])
    }

    fn give_back(&self, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.buffer_len);
        let mut state = self.state.lock();
        if state.live > 0 {
            state.live -= 1;
            state.free.push(buf);
        }
    }
}

/// Size-tiered buffer pool. One shared instance serves the whole process;
/// fresh instances are only built directly in tests.
#[derive(Debug)]
pub struct BufferPool {
    buckets: Vec<Bucket>,
}

impl BufferPool {
    fn new() -> Self {
        let buckets = BUCKET_CONFIG
            .iter()
            .map(|&(len, slots)| Bucket::new(len, slots))
            .collect();
        BufferPool { buckets }
    }

    /// The process-wide pool shared by every open archive.
    pub fn shared() -> &'static BufferPool {
        &SHARED_POOL
    }

    /// Rents a buffer of at least `min_len` bytes, returned to the pool when
    /// the guard drops.
    ///
    /// The buffer may be longer than `min_len` when it comes from a larger
    /// tier; callers track their logical length separately and slice.
    pub fn rent(&self, min_len: usize) -> PooledBuf<'_> {
        let buf = match self.select_bucket(min_len) {
            Some(bucket) => bucket.rent().unwrap_or_else(|| vec![0u8; min_len]),
            None => vec![0u8; min_len],
        };
        PooledBuf { buf, pool: self }
    }

    /// First tier whose buffers are long enough.
    fn select_bucket(&self, min_len: usize) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.buffer_len >= min_len)
    }

    /// Recycles `buf` if its length exactly matches a tier, drops it
    /// otherwise.
    fn give_back(&self, buf: Vec<u8>) {
        if let Some(bucket) = self.buckets.iter().find(|b| b.buffer_len == buf.len()) {
            bucket.give_back(buf);
        }
    }
}

/// Scoped handle to a rented buffer. Dereferences to the full byte slice and
/// hands the buffer back to its pool on drop, so a rented buffer is returned
/// exactly once no matter how the using scope exits.
#[derive(Debug)]
pub struct PooledBuf<'a> {
    buf: Vec<u8>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
