//! Segment Pool
//!
//! A bounded pool of segment-size buffers used to stage open segments and to
//! materialise closed segments during recovery. The pool is fungible: any
//! buffer serves any segment, so the capacity bounds total staging memory
//! without dedicating buffers to particular masters.
//!
//! `checkout` never blocks; it fails fast with `PoolExhausted` and leaves
//! backoff policy to the caller. Foreground opens surface the failure to the
//! master (which picks another backup); recovery loads retry with a sleep.
//!
//! Buffers are returned by dropping them: `PoolBuffer` pushes its memory back
//! onto the free list on drop, so a buffer can never leak out of the pool's
//! accounting no matter which error path releases it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use logvault_core::{Error, Result};

struct PoolShared {
    buffer_size: usize,
    capacity: usize,
    /// Buffers previously checked out and returned. Contents unspecified.
    free: Mutex<Vec<Box<[u8]>>>,
    /// Buffers ever created; never exceeds capacity.
    allocated: AtomicUsize,
    /// Buffers currently checked out.
    outstanding: AtomicUsize,
}

/// Bounded pool of segment-size staging buffers.
#[derive(Clone)]
pub struct SegmentPool {
    shared: Arc<PoolShared>,
}

impl SegmentPool {
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                buffer_size,
                capacity,
                free: Mutex::new(Vec::with_capacity(capacity)),
                allocated: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out a buffer. Zero-filled on first allocation; recycled buffers
    /// keep whatever the previous user wrote.
    pub fn checkout(&self) -> Result<PoolBuffer> {
        let shared = &self.shared;
        let recycled = shared.free.lock().expect("pool lock poisoned").pop();
        let data = match recycled {
            Some(data) => data,
            None => {
                // Reserve a slot before allocating so concurrent checkouts
                // cannot overshoot capacity.
                let mut allocated = shared.allocated.load(Ordering::Relaxed);
                loop {
                    if allocated >= shared.capacity {
                        return Err(Error::PoolExhausted);
                    }
                    match shared.allocated.compare_exchange_weak(
                        allocated,
                        allocated + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(current) => allocated = current,
                    }
                }
                vec![0u8; shared.buffer_size].into_boxed_slice()
            }
        };
        shared.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(PoolBuffer {
            data: Some(data),
            shared: Arc::clone(shared),
        })
    }

    /// Whether `buffer` was checked out of this pool.
    pub fn is_from(&self, buffer: &PoolBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &buffer.shared)
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Relaxed)
    }
}

/// A segment-size buffer on loan from a [`SegmentPool`]. Dropping it returns
/// the memory to the pool.
pub struct PoolBuffer {
    data: Option<Box<[u8]>>,
    shared: Arc<PoolShared>,
}

impl PoolBuffer {
    /// Zero the whole buffer, as required when opening a fresh segment.
    pub fn zero(&mut self) {
        self.fill(0);
    }
}

impl Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_ref().expect("pool buffer already returned")
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_mut().expect("pool buffer already returned")
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.shared
                .free
                .lock()
                .expect("pool lock poisoned")
                .push(data);
            self.shared.outstanding.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
