use crate::error::{PipelineError, Result};
use crate::lock::{self, LockPolicy};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Tolerance for comparing samples read back from a buffer
pub const SAMPLE_EPSILON: f32 = 1e-5;

/// Why a write or read did not go through.
///
/// None of these are failures of the buffer: `Full` and `Empty` are the
/// expected steady state under rate mismatch, and `LockTimeout` reports that
/// the bounded lock retry ran out. The caller decides whether to retry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// No free slot for a write
    #[error("buffer is full")]
    Full,
    /// No sample available for a read
    #[error("buffer is empty")]
    Empty,
    /// The lock could not be taken within the retry policy
    #[error("buffer lock not acquired after {attempts} attempts")]
    LockTimeout { attempts: u32 },
}

/// Everything guarded by the buffer lock
#[derive(Debug)]
struct RingState {
    storage: Box<[f32]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl RingState {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn is_full(&self) -> bool {
        self.count == self.storage.len()
    }
}

/// Consistent view of the buffer indices, taken under the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub head: usize,
    pub tail: usize,
    pub count: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RingState>,
    capacity: usize,
    policy: LockPolicy,
    closed: AtomicBool,
    full_rejections: AtomicU64,
    empty_reads: AtomicU64,
    lock_timeouts: AtomicU64,
}

/// A fixed-capacity FIFO ring of `f32` samples shared by one writer and one
/// reader thread.
///
/// Cloning yields another handle to the same ring. Writes and reads never
/// wait for space or data; they fail fast with [`Rejected`].
#[derive(Debug, Clone)]
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` samples
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_lock_policy(capacity, LockPolicy::default())
    }

    /// Create a ring buffer with a custom lock retry policy
    pub fn with_lock_policy(capacity: usize, policy: LockPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::InvalidCapacity(capacity));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| PipelineError::Allocation { capacity })?;
        storage.resize(capacity, 0.0f32);

        debug!(capacity, "ring buffer allocated");

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RingState {
                    storage: storage.into_boxed_slice(),
                    head: 0,
                    tail: 0,
                    count: 0,
                }),
                capacity,
                policy,
                closed: AtomicBool::new(false),
                full_rejections: AtomicU64::new(0),
                empty_reads: AtomicU64::new(0),
                lock_timeouts: AtomicU64::new(0),
            }),
        })
    }

    /// Release the handle held in `slot`, leaving `None` behind.
    ///
    /// Calling this again on the same slot does nothing. Storage is freed
    /// once the last handle to the ring is gone.
    pub fn destroy(slot: &mut Option<RingBuffer>) {
        if let Some(buffer) = slot.take() {
            debug!(capacity = buffer.capacity(), "ring buffer handle released");
        }
    }

    fn lock(&self, op: &'static str) -> std::result::Result<MutexGuard<'_, RingState>, Rejected> {
        lock::acquire(&self.shared.state, &self.shared.policy, op).map_err(|attempts| {
            self.shared.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            Rejected::LockTimeout { attempts }
        })
    }

    /// Append `value` at the tail
    pub fn write(&self, value: f32) -> std::result::Result<(), Rejected> {
        let mut state = self.lock("write")?;
        if state.is_full() {
            drop(state);
            self.shared.full_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(Rejected::Full);
        }

        let tail = state.tail;
        state.storage[tail] = value;
        state.count += 1;
        state.tail = (tail + 1) % self.shared.capacity;
        Ok(())
    }

    /// Remove the sample at the head
    pub fn read(&self) -> std::result::Result<f32, Rejected> {
        let mut state = self.lock("read")?;
        if state.is_empty() {
            drop(state);
            self.shared.empty_reads.fetch_add(1, Ordering::Relaxed);
            return Err(Rejected::Empty);
        }

        let head = state.head;
        let value = state.storage[head];
        state.count -= 1;
        state.head = (head + 1) % self.shared.capacity;
        Ok(value)
    }

    /// Mark that no more samples will be written
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    /// Whether the writer has announced the end of the stream
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Indices and occupancy at one instant. Diagnostics only: the value may be
    /// stale as soon as it is returned.
    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.shared.state.lock();
        BufferSnapshot {
            head: state.head,
            tail: state.tail,
            count: state.count,
            capacity: self.shared.capacity,
        }
    }

    /// Get the current number of samples (diagnostics only)
    pub fn len(&self) -> usize {
        self.shared.state.lock().count
    }

    /// Check if the buffer is empty (diagnostics only)
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().is_empty()
    }

    /// Check if the buffer is full (diagnostics only)
    pub fn is_full(&self) -> bool {
        self.shared.state.lock().is_full()
    }

    /// Get the capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Lock policy used by write and read
    pub fn lock_policy(&self) -> LockPolicy {
        self.shared.policy
    }

    /// Get the utilization of the buffer as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity()).min(100) as u32
    }

    /// Number of writes rejected because the buffer was full
    pub fn full_rejections(&self) -> u64 {
        self.shared.full_rejections.load(Ordering::Relaxed)
    }

    /// Number of reads that found the buffer empty
    pub fn empty_reads(&self) -> u64 {
        self.shared.empty_reads.load(Ordering::Relaxed)
    }

    /// Number of operations that gave up on the lock
    pub fn lock_timeouts(&self) -> u64 {
        self.shared.lock_timeouts.load(Ordering::Relaxed)
    }

    /// Reset counters (useful for testing)
    pub fn reset_counters(&self) {
        self.shared.full_rejections.store(0, Ordering::Relaxed);
        self.shared.empty_reads.store(0, Ordering::Relaxed);
        self.shared.lock_timeouts.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> MutexGuard<'_, impl Sized> {
        self.shared.state.lock()
    }
}
