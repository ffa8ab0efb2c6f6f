//! Fixed-size import buffers and the pool that bounds their memory.
//!
//! A [`BufferPool`] owns `count` buffers of `buffer_size` bytes, allocated
//! once. Workers check buffers out with [`BufferPool::acquire`] and get them
//! back when the returned [`PooledBuffer`] is dropped. Acquisition waits at
//! most the configured timeout and then fails, so a full pool surfaces as
//! [`CoreError::BufferPoolExhausted`] instead of a hang.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::{BufferKind, ImportConfig};
use crate::error::{CoreError, CoreResult};

/// Fixed-capacity byte buffer.
pub trait Buffer: Send {
    /// Size in bytes.
    fn capacity(&self) -> usize;

    /// The whole buffer.
    fn as_slice(&self) -> &[u8];

    /// The whole buffer, writable.
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Buffer on the Rust heap.
pub struct HeapBuffer {
    bytes: Box<[u8]>,
}

impl HeapBuffer {
    /// Allocates a zeroed buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
        }
    }
}

impl Buffer for HeapBuffer {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Buffer in an anonymous memory mapping, outside the allocator.
pub struct OffHeapBuffer {
    map: MmapMut,
}

impl OffHeapBuffer {
    /// Maps `capacity` anonymous bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping fails.
    pub fn new(capacity: usize) -> CoreResult<Self> {
        Ok(Self {
            map: MmapMut::map_anon(capacity)?,
        })
    }
}

impl Buffer for OffHeapBuffer {
    fn capacity(&self) -> usize {
        self.map.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.map
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// Returns `true` if anonymous mappings work on this platform. Probed once.
pub fn off_heap_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| MmapMut::map_anon(4096).is_ok())
}

struct PoolInner {
    free: Mutex<Vec<Box<dyn Buffer>>>,
    returned: Condvar,
    buffer_size: usize,
    count: usize,
    off_heap: bool,
    timeout: Duration,
}

/// Shared pool of import buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Allocates `count` buffers of `buffer_size` bytes.
    ///
    /// [`BufferKind::Auto`] picks off-heap buffers when
    /// [`off_heap_supported`] says so.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when off-heap buffers are
    /// requested but unsupported, or an I/O error if a mapping fails.
    pub fn new(
        buffer_size: usize,
        count: usize,
        kind: BufferKind,
        timeout: Duration,
    ) -> CoreResult<Self> {
        let off_heap = match kind {
            BufferKind::Heap => false,
            BufferKind::OffHeap if !off_heap_supported() => {
                return Err(CoreError::invalid_operation(
                    "off-heap buffers are not supported on this platform",
                ))
            }
            BufferKind::OffHeap => true,
            BufferKind::Auto => off_heap_supported(),
        };
        let mut free: Vec<Box<dyn Buffer>> = Vec::with_capacity(count);
        for _ in 0..count {
            if off_heap {
                free.push(Box::new(OffHeapBuffer::new(buffer_size)?));
            } else {
                free.push(Box::new(HeapBuffer::new(buffer_size)));
            }
        }
        debug!(buffer_size, count, off_heap, "allocated import buffer pool");
        Ok(Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                returned: Condvar::new(),
                buffer_size,
                count,
                off_heap,
                timeout,
            }),
        })
    }

    /// Builds the pool described by `config`.
    ///
    /// # Errors
    ///
    /// Same as [`BufferPool::new`].
    pub fn from_config(config: &ImportConfig) -> CoreResult<Self> {
        Self::new(
            config.buffer_size,
            config.buffer_count,
            config.buffer_kind,
            config.buffer_timeout(),
        )
    }

    /// Size of each buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers owned by the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.count
    }

    /// Number of buffers currently checked in.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Returns `true` if the pool hands out off-heap buffers.
    #[must_use]
    pub fn is_off_heap(&self) -> bool {
        self.inner.off_heap
    }

    /// Checks out a buffer, waiting up to the pool timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BufferPoolExhausted`] if none came back in time.
    pub fn acquire(&self) -> CoreResult<PooledBuffer> {
        let started = Instant::now();
        let deadline = started + self.inner.timeout;
        let mut free = self.inner.free.lock();
        loop {
            if let Some(buffer) = free.pop() {
                return Ok(PooledBuffer {
                    buffer: Some(buffer),
                    pool: Arc::clone(&self.inner),
                });
            }
            if self.inner.returned.wait_until(&mut free, deadline).timed_out() && free.is_empty() {
                return Err(CoreError::BufferPoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Checks out a buffer if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        let buffer = self.inner.free.lock().pop()?;
        Some(PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(&self.inner),
        })
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("count", &self.inner.count)
            .field("off_heap", &self.inner.off_heap)
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`], returned on drop.
pub struct PooledBuffer {
    buffer: Option<Box<dyn Buffer>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = dyn Buffer;

    fn deref(&self) -> &Self::Target {
        match &self.buffer {
            Some(buffer) => buffer.as_ref(),
            None => unreachable!("buffer is only taken on drop"),
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.buffer {
            Some(buffer) => buffer.as_mut(),
            None => unreachable!("buffer is only taken on drop"),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.free.lock().push(buffer);
            self.pool.returned.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn heap_and_off_heap_buffers_are_writable() {
        let mut heap = HeapBuffer::new(16);
        heap.as_mut_slice()[3] = 7;
        assert_eq!(heap.as_slice()[3], 7);
        assert_eq!(heap.capacity(), 16);

        if off_heap_supported() {
            let mut mapped = OffHeapBuffer::new(4096).unwrap();
            mapped.as_mut_slice()[4095] = 9;
            assert_eq!(mapped.as_slice()[4095], 9);
        }
    }

    #[test]
    fn buffers_return_on_drop() {
        let pool = BufferPool::new(64, 2, BufferKind::Heap, Duration::from_millis(10)).unwrap();
        assert!(!pool.is_off_heap());
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
        drop(a);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire().unwrap().capacity(), 64);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = BufferPool::new(64, 1, BufferKind::Auto, Duration::from_millis(20)).unwrap();
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, CoreError::BufferPoolExhausted { .. }));
    }

    #[test]
    fn waiter_wakes_when_buffer_returns() {
        let pool = BufferPool::new(64, 1, BufferKind::Heap, Duration::from_secs(5)).unwrap();
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|buffer| buffer.capacity()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 64);
    }
}
