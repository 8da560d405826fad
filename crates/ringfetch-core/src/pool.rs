//! Fixed-size buffer pools keyed by buffer length.
//!
//! Every distinct length gets one process-wide [`BufferPool`], created lazily
//! on first use by [`pool_for`]. Ring storage is keyed by tier capacity and
//! transfer scratch space by scratch size, so the set of live pools stays as
//! small as the set of tiers. Pools hold plain heap memory and never need
//! teardown.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Idle memory a single pool may keep around.
const IDLE_BYTES_BUDGET: usize = 64 * 1024 * 1024;

/// Upper bound on idle buffers per pool regardless of size.
const MAX_IDLE_BUFFERS: usize = 16;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers freshly allocated
    pub allocated: u64,
    /// Buffers handed out from the idle list
    pub reused: u64,
    /// Buffers currently idle
    pub idle: usize,
}

/// A pool of equally sized byte buffers.
pub struct BufferPool {
    buffer_len: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl BufferPool {
    /// Create a pool handing out buffers of exactly `buffer_len` bytes.
    pub fn new(buffer_len: usize, max_idle: usize) -> Self {
        Self {
            buffer_len,
            max_idle,
            idle: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Length of every buffer from this pool.
    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Take a buffer, reusing an idle one when available.
    ///
    /// Reused buffers are not zeroed; callers track which bytes are valid.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let recycled = self.idle.lock().pop();
        let data = match recycled {
            Some(buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.buffer_len].into_boxed_slice()
            }
        };

        PooledBuffer {
            data: Some(data),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Box<[u8]>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_len", &self.buffer_len)
            .field("max_idle", &self.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned to it on drop.
pub struct PooledBuffer {
    data: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// The pool this buffer goes back to.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

fn registry() -> &'static DashMap<usize, Arc<BufferPool>> {
    static POOLS: OnceLock<DashMap<usize, Arc<BufferPool>>> = OnceLock::new();
    POOLS.get_or_init(DashMap::new)
}

/// Idle buffers retained for a given buffer length.
fn idle_limit(buffer_len: usize) -> usize {
    if buffer_len == 0 {
        return MAX_IDLE_BUFFERS;
    }
    (IDLE_BYTES_BUDGET / buffer_len).clamp(1, MAX_IDLE_BUFFERS)
}

/// The process-wide pool for buffers of `buffer_len` bytes.
pub fn pool_for(buffer_len: usize) -> Arc<BufferPool> {
    registry()
        .entry(buffer_len)
        .or_insert_with(|| {
            debug!("Creating buffer pool for {} byte buffers", buffer_len);
            Arc::new(BufferPool::new(buffer_len, idle_limit(buffer_len)))
        })
        .clone()
}
