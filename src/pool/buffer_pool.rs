use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_MIN_CHUNK: usize = 64;
pub const DEFAULT_MAX_CHUNK: usize = 64 * 1024;
pub const DEFAULT_GROWTH_FACTOR: usize = 2;
pub const DEFAULT_BUDGET: usize = 10 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- PoolConfig ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_chunk: usize,
    pub max_chunk: usize,
    pub growth_factor: usize,

    /// Upper bound on bytes checked out of the pool at once. 0 = unbounded.
    pub budget: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_chunk: DEFAULT_MIN_CHUNK,
            max_chunk: DEFAULT_MAX_CHUNK,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            budget: DEFAULT_BUDGET,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BufferPool ------------------------------------------------------------

#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    classes: Vec<usize>,
    free: Vec<Mutex<Vec<BytesMut>>>,
    budget: Option<Arc<Semaphore>>,
    budget_bytes: usize,
}

// -----------------------------------------------------------------------------
// ----- BufferPool: Static ----------------------------------------------------

impl BufferPool {
    pub fn new(config: &PoolConfig) -> Self {
        let classes = size_classes(config.min_chunk, config.max_chunk, config.growth_factor);
        let free = classes.iter().map(|_| Mutex::new(Vec::new())).collect();

        let budget_bytes = config.budget.min(Semaphore::MAX_PERMITS);
        let budget = (budget_bytes > 0).then(|| Arc::new(Semaphore::new(budget_bytes)));

        Self {
            inner: Arc::new(PoolInner {
                classes,
                free,
                budget,
                budget_bytes,
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- BufferPool: Public ----------------------------------------------------

impl BufferPool {
    pub fn size_classes(&self) -> &[usize] {
        &self.inner.classes
    }

    /// Capacity a request of `size` bytes is served with, or `None` when it
    /// bypasses the pool.
    pub fn class_of(&self, size: usize) -> Option<usize> {
        self.class_index(size).map(|index| self.inner.classes[index])
    }

    /// Get a buffer of at least `size` bytes. Waits while the budget is
    /// exhausted; requests above the largest class are allocated directly.
    pub async fn acquire(&self, size: usize) -> PooledBuf {
        let Some(index) = self.class_index(size) else {
            return PooledBuf::unpooled(BytesMut::with_capacity(size));
        };

        let permit = match &self.inner.budget {
            Some(budget) => budget
                .clone()
                .acquire_many_owned(self.permits_for(index))
                .await
                .ok(),
            None => None,
        };

        self.checkout(index, permit)
    }

    /// Like `acquire`, but returns `None` instead of waiting for budget.
    pub fn try_acquire(&self, size: usize) -> Option<PooledBuf> {
        let Some(index) = self.class_index(size) else {
            return Some(PooledBuf::unpooled(BytesMut::with_capacity(size)));
        };

        let permit = match &self.inner.budget {
            Some(budget) => Some(
                budget
                    .clone()
                    .try_acquire_many_owned(self.permits_for(index))
                    .ok()?,
            ),
            None => None,
        };

        Some(self.checkout(index, permit))
    }

    pub fn release(&self, buf: PooledBuf) {
        drop(buf);
    }

    /// Bytes that can still be checked out before `acquire` starts waiting.
    pub fn available(&self) -> Option<usize> {
        self.inner
            .budget
            .as_ref()
            .map(|budget| budget.available_permits())
    }

    /// Buffers parked in the free lists, across all classes.
    pub fn idle_buffers(&self) -> usize {
        self.inner.free.iter().map(|list| list.lock().len()).sum()
    }
}

// -----------------------------------------------------------------------------
// ----- BufferPool: Private ---------------------------------------------------

impl BufferPool {
    fn class_index(&self, size: usize) -> Option<usize> {
        let classes = &self.inner.classes;
        let index = classes.partition_point(|&class| class < size);
        (index < classes.len()).then_some(index)
    }

    fn permits_for(&self, index: usize) -> u32 {
        let class = self.inner.classes[index].min(self.inner.budget_bytes);
        u32::try_from(class).unwrap_or(u32::MAX)
    }

    fn checkout(&self, index: usize, permit: Option<OwnedSemaphorePermit>) -> PooledBuf {
        let class = self.inner.classes[index];
        let buf = self.inner.free[index]
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(class));

        PooledBuf {
            buf,
            home: Some(Home {
                pool: self.inner.clone(),
                index,
                _permit: permit,
            }),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &self.inner.classes)
            .field("budget", &self.inner.budget_bytes)
            .field("available", &self.available())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- PooledBuf -------------------------------------------------------------

/// A buffer checked out of a `BufferPool`. Dropping it hands it back.
pub struct PooledBuf {
    buf: BytesMut,
    home: Option<Home>,
}

struct Home {
    pool: Arc<PoolInner>,
    index: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledBuf {
    pub fn unpooled(buf: BytesMut) -> Self {
        Self { buf, home: None }
    }

    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let Some(home) = self.home.take() else {
            return;
        };

        // split_to/split_off shrink the allocation; such buffers just go away
        if self.buf.capacity() < home.pool.classes[home.index] {
            return;
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        home.pool.free[home.index].lock().push(buf);

        // budget permit is returned when `home` drops, after the buffer is parked
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn size_classes(min_chunk: usize, max_chunk: usize, growth_factor: usize) -> Vec<usize> {
    let min_chunk = min_chunk.max(1);
    let max_chunk = max_chunk.max(min_chunk);
    let growth_factor = growth_factor.max(2);

    let mut classes = Vec::new();
    let mut size = min_chunk;
    while size < max_chunk {
        classes.push(size);
        size = size.saturating_mul(growth_factor);
    }
    classes.push(max_chunk);
    classes
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(min: usize, max: usize, factor: usize, budget: usize) -> BufferPool {
        BufferPool::new(&PoolConfig {
            min_chunk: min,
            max_chunk: max,
            growth_factor: factor,
            budget,
        })
    }

    #[test]
    fn classes_grow_geometrically_and_end_at_max() {
        let p = pool(64, 1000, 2, 0);
        assert_eq!(p.size_classes(), &[64, 128, 256, 512, 1000]);

        let p = pool(64, 64 * 1024, 2, 0);
        assert_eq!(p.size_classes().first(), Some(&64));
        assert_eq!(p.size_classes().last(), Some(&(64 * 1024)));
    }

    #[test]
    fn picks_smallest_class_that_fits() {
        let p = pool(64, 1024, 2, 0);
        assert_eq!(p.class_of(1), Some(64));
        assert_eq!(p.class_of(64), Some(64));
        assert_eq!(p.class_of(65), Some(128));
        assert_eq!(p.class_of(1024), Some(1024));
        assert_eq!(p.class_of(1025), None);
    }

    #[tokio::test]
    async fn oversized_requests_bypass_the_pool() {
        let p = pool(64, 1024, 2, 2048);
        let buf = p.acquire(4096).await;
        assert!(!buf.is_pooled());
        assert!(buf.capacity() >= 4096);
        assert_eq!(p.available(), Some(2048));

        drop(buf);
        assert_eq!(p.idle_buffers(), 0);
    }

    #[tokio::test]
    async fn released_buffers_are_reused() {
        let p = pool(64, 1024, 2, 0);
        let mut buf = p.acquire(100).await;
        assert!(buf.capacity() >= 128);
        buf.extend_from_slice(b"hello");

        p.release(buf);
        assert_eq!(p.idle_buffers(), 1);

        let buf = p.acquire(120).await;
        assert!(buf.is_empty());
        assert_eq!(p.idle_buffers(), 0);
    }

    #[tokio::test]
    async fn acquire_waits_for_budget_instead_of_failing() {
        let p = pool(64, 256, 2, 512);
        let a = p.acquire(256).await;
        let b = p.acquire(256).await;
        assert_eq!(p.available(), Some(0));
        assert!(p.try_acquire(64).is_none());

        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.acquire(200).await.capacity() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(a);
        let capacity = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken by the release")
            .unwrap();
        assert!(capacity >= 256);

        drop(b);
    }

    #[test]
    fn try_acquire_accounts_budget() {
        let p = pool(64, 256, 2, 256);
        let a = p.try_acquire(10).unwrap();
        assert_eq!(p.available(), Some(192));
        drop(a);
        assert_eq!(p.available(), Some(256));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
