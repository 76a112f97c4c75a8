//! Execution context shared by every bulk operation.
//!
//! [`Resources`] bundles the three collaborators an operation needs:
//!
//! - a rayon thread pool (or the global pool) on which data-parallel phases run,
//! - a [`MemoryResource`] that grants scratch and persistent buffers,
//! - a [`CancellationToken`] checked between iterations and batches.
//!
//! Operations are synchronous: they return once all enqueued work has
//! completed, and their results never depend on how rayon scheduled it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{IvfPqError, Result};

/// Source of working and persistent buffers.
///
/// The engine asks for a byte count before it allocates a buffer and hands
/// the bytes back when the buffer is dropped. Implementations decide whether
/// a request fits.
pub trait MemoryResource: Send + Sync + fmt::Debug {
    /// Try to reserve `bytes`; `false` means the request cannot be satisfied.
    fn try_acquire(&self, bytes: usize) -> bool;

    /// Return `bytes` previously granted by [`try_acquire`](Self::try_acquire).
    fn release(&self, bytes: usize);
}

/// Unbounded resource backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryResource for SystemMemory {
    #[inline]
    fn try_acquire(&self, _bytes: usize) -> bool {
        true
    }

    #[inline]
    fn release(&self, _bytes: usize) {}
}

/// Resource with a fixed byte budget.
#[derive(Debug)]
pub struct BoundedMemory {
    limit: usize,
    used: AtomicUsize,
}

impl BoundedMemory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Bytes currently granted.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl MemoryResource for BoundedMemory {
    fn try_acquire(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .is_ok()
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Bytes granted by a [`MemoryResource`], returned on drop.
pub struct Allocation {
    bytes: usize,
    resource: Arc<dyn MemoryResource>,
}

impl Allocation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.resource.release(self.bytes);
        }
    }
}

/// Grant `bytes` from `resource`, or fail with `ResourceExhausted`.
pub(crate) fn allocate(resource: &Arc<dyn MemoryResource>, bytes: usize) -> Result<Allocation> {
    if bytes > 0 && !resource.try_acquire(bytes) {
        return Err(IvfPqError::ResourceExhausted { requested: bytes });
    }
    Ok(Allocation {
        bytes,
        resource: Arc::clone(resource),
    })
}

/// Cooperative cancellation flag shared between a caller and running work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; in-flight operations stop at their next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Execution context: thread pool, memory resource and cancellation token.
#[derive(Clone)]
pub struct Resources {
    pool: Option<Arc<rayon::ThreadPool>>,
    memory: Arc<dyn MemoryResource>,
    cancel: CancellationToken,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            pool: None,
            memory: Arc::new(SystemMemory),
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("threads", &self.num_threads())
            .field("memory", &self.memory)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run parallel phases on a dedicated pool of `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(IvfPqError::config("thread count must be greater than 0"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ivfpq-{i}"))
            .build()
            .map_err(|e| IvfPqError::config(format!("failed to start thread pool: {e}")))?;
        self.pool = Some(Arc::new(pool));
        Ok(self)
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryResource>) -> Self {
        self.memory = memory;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryResource> {
        &self.memory
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` inside this context's thread pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Fail with `Cancelled` if cancellation was requested.
    #[inline]
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(IvfPqError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Grant `bytes` from the memory resource.
    pub fn allocate(&self, bytes: usize) -> Result<Allocation> {
        allocate(&self.memory, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_memory_refuses_over_budget() {
        let mem = Arc::new(BoundedMemory::new(100));
        let res = Resources::new().with_memory(mem.clone());
        let a = res.allocate(60).unwrap();
        assert_eq!(mem.used(), 60);
        assert_eq!(
            res.allocate(41).unwrap_err(),
            IvfPqError::ResourceExhausted { requested: 41 }
        );
        drop(a);
        assert_eq!(mem.used(), 0);
        let _b = res.allocate(100).unwrap();
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let res = Resources::new().with_cancellation(token.clone());
        assert!(res.check_cancelled().is_ok());
        token.cancel();
        assert_eq!(res.check_cancelled(), Err(IvfPqError::Cancelled));
    }

    #[test]
    fn dedicated_pool_runs_work() {
        let res = Resources::new().with_threads(2).unwrap();
        assert_eq!(res.num_threads(), 2);
        let sum: u64 = res.install(|| {
            use rayon::prelude::*;
            (0..100u64).into_par_iter().sum()
        });
        assert_eq!(sum, 4950);
        assert!(Resources::new().with_threads(0).is_err());
    }
}
