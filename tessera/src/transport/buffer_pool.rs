use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A lock-free pool of reusable payload buffers.
///
/// Every message that crosses the fabric is copied into a pooled buffer, so
/// steady-state collectives stop allocating once the pool is warm. Buffers
/// that have grown beyond `max_buffer_bytes` are dropped instead of returned.
pub struct BufferPool {
    queue: ArrayQueue<Vec<u8>>,
    max_buffer_bytes: usize,
}

impl BufferPool {
    /// Create a pool holding up to `capacity` idle buffers.
    pub fn new(capacity: usize, max_buffer_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: ArrayQueue::new(capacity.max(1)),
            max_buffer_bytes,
        })
    }

    /// Check out a buffer holding a copy of `data`.
    pub fn copy_from(self: &Arc<Self>, data: &[u8]) -> PooledBuf {
        let mut buf = self.queue.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(data);
        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.queue.len()
    }

    fn return_buf(&self, mut buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > self.max_buffer_bytes {
            return;
        }
        buf.clear();
        let _ = self.queue.push(buf);
    }
}

/// A buffer checked out from a `BufferPool`. Derefs to `[u8]`.
/// On drop, the underlying `Vec` is cleared and returned to the pool.
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.return_buf(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .finish()
    }
}
