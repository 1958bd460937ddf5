//! In-Memory Storage Backend
//!
//! A fixed array of frame buffers behind a mutex. Used by tests and by
//! `":memory:"` deployments where durability is delegated elsewhere. `flush`
//! and `quiesce` are no-ops: a write is as durable as it will ever get the
//! moment it lands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use logvault_core::{Error, Result};

use super::{BackupStorage, FrameHandle};

pub struct InMemoryStorage {
    segment_size: usize,
    frames: Mutex<Vec<Box<[u8]>>>,
    free: Mutex<Vec<u32>>,
    outstanding: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new(segment_size: usize, frame_count: usize) -> Self {
        let frames = (0..frame_count)
            .map(|_| vec![0u8; segment_size].into_boxed_slice())
            .collect();
        // Reverse so allocation hands out frame 0 first.
        let free = (0..frame_count as u32).rev().collect();
        Self {
            segment_size,
            frames: Mutex::new(frames),
            free: Mutex::new(free),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Copy of a frame's bytes, for test assertions. Frames are handed out
    /// in index order, so the first segment opened owns frame 0.
    pub fn frame_contents(&self, frame: u32) -> Vec<u8> {
        let frames = self.frames.lock().expect("storage lock poisoned");
        frames[frame as usize].to_vec()
    }
}

impl BackupStorage for InMemoryStorage {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().expect("storage lock poisoned").len()
    }

    fn allocate(&self) -> Result<FrameHandle> {
        let frame = self
            .free
            .lock()
            .expect("storage lock poisoned")
            .pop()
            .ok_or(Error::OutOfStorage)?;
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(FrameHandle::new(frame))
    }

    fn write(&self, handle: &FrameHandle, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > self.segment_size {
            return Err(Error::SegmentOverflow {
                offset: offset as u32,
                len: bytes.len() as u32,
                capacity: self.segment_size as u32,
            });
        }
        let mut frames = self.frames.lock().expect("storage lock poisoned");
        frames[handle.frame() as usize][offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&self, _handle: &FrameHandle) -> Result<()> {
        Ok(())
    }

    fn read(&self, handle: &FrameHandle, dst: &mut [u8]) -> Result<()> {
        let frames = self.frames.lock().expect("storage lock poisoned");
        dst.copy_from_slice(&frames[handle.frame() as usize]);
        Ok(())
    }

    fn free(&self, handle: FrameHandle) {
        tracing::debug!(frame = handle.frame(), "freeing in-memory frame");
        self.free
            .lock()
            .expect("storage lock poisoned")
            .push(handle.frame());
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    fn quiesce(&self) -> Result<()> {
        Ok(())
    }

    fn allocated_handles(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}
