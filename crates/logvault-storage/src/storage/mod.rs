//! Storage Backends
//!
//! Persistence for segment frames. A frame is a segment-size slot addressed
//! by an opaque [`FrameHandle`]; a segment occupies exactly one frame from
//! open until free.
//!
//! ## Contract
//!
//! - `allocate` fails with `OutOfStorage` when no frame is free
//! - `write` implies no durability; `flush` makes prior writes for the handle
//!   durable before returning
//! - `read` fills the caller's buffer with the whole frame
//! - `free` consumes the handle, so a freed frame cannot be touched again;
//!   the use-after-free from the contract is unrepresentable
//! - `quiesce` returns once all in-flight flushes are durable
//!
//! Two implementations: [`InMemoryStorage`](memory::InMemoryStorage) for
//! tests, and [`SingleFileStorage`](file::SingleFileStorage) which places
//! frame *i* at file offset `i * segment_size` with synchronous writes.
//!
//! Each backend instance carries its own count of outstanding handles so
//! tests can assert that no segment leaks a frame; there is no process-wide
//! counter.

pub mod file;
pub mod memory;

use std::sync::Arc;

use logvault_core::Result;

use crate::config::BackupConfig;

pub use file::SingleFileStorage;
pub use memory::InMemoryStorage;

/// Opaque reference to an allocated frame. Not cloneable; freeing a frame
/// consumes its handle.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameHandle {
    frame: u32,
}

impl FrameHandle {
    pub(crate) fn new(frame: u32) -> Self {
        Self { frame }
    }

    /// Index of the frame within the backend.
    pub fn frame(&self) -> u32 {
        self.frame
    }
}

/// Frame-allocating persistence layer. Implementations are internally
/// thread-safe; calls may arrive concurrently from request handlers and the
/// recovery workers.
pub trait BackupStorage: Send + Sync {
    /// Size of every frame in bytes.
    fn segment_size(&self) -> usize;

    /// Total number of frames.
    fn frame_count(&self) -> usize;

    /// Reserve a free frame.
    fn allocate(&self) -> Result<FrameHandle>;

    /// Write `bytes` into the frame at `offset`. Durability requires `flush`.
    fn write(&self, handle: &FrameHandle, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Make all prior writes for `handle` durable.
    fn flush(&self, handle: &FrameHandle) -> Result<()>;

    /// Read the whole frame into `dst` (which must be `segment_size` long).
    fn read(&self, handle: &FrameHandle, dst: &mut [u8]) -> Result<()>;

    /// Return the frame to the free list.
    fn free(&self, handle: FrameHandle);

    /// Block until every in-flight flush is durable.
    fn quiesce(&self) -> Result<()>;

    /// Handles currently allocated and not yet freed. Tests use this to
    /// assert no segment leaks its frame.
    fn allocated_handles(&self) -> usize;
}

/// Build the backend selected by `config.storage_path`.
pub fn open_storage(config: &BackupConfig) -> Result<Arc<dyn BackupStorage>> {
    if config.uses_memory_storage() {
        Ok(Arc::new(InMemoryStorage::new(
            config.segment_size as usize,
            config.frame_count,
        )))
    } else {
        Ok(Arc::new(SingleFileStorage::open(
            &config.storage_path,
            config.segment_size as usize,
            config.frame_count,
        )?))
    }
}
