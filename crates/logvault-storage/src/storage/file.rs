//! Single-File Storage Backend
//!
//! All frames live in one preallocated file: frame *i* occupies bytes
//! `[i * segment_size, (i + 1) * segment_size)`. No per-frame metadata is
//! stored out of band; a segment's own header carries `(log_id, segment_id)`,
//! so a restarted backup can identify what a frame holds from the frame bytes
//! alone.
//!
//! Writes are synchronous `seek + write_all` under the file lock; `flush`
//! issues `sync_data` so a close acknowledged to a master survives power
//! loss. `quiesce` issues `sync_all` for the stragglers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use logvault_core::{Error, Result};

use super::{BackupStorage, FrameHandle};

pub struct SingleFileStorage {
    segment_size: usize,
    frame_count: usize,
    file: Mutex<File>,
    free: Mutex<Vec<u32>>,
    outstanding: AtomicUsize,
}

impl SingleFileStorage {
    /// Open (or create) the backing file and size it for `frame_count`
    /// frames.
    pub fn open(path: impl AsRef<Path>, segment_size: usize, frame_count: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        file.set_len((segment_size * frame_count) as u64)?;
        tracing::info!(
            path = %path.as_ref().display(),
            segment_size,
            frame_count,
            "opened single-file segment storage"
        );
        Ok(Self {
            segment_size,
            frame_count,
            file: Mutex::new(file),
            free: Mutex::new((0..frame_count as u32).rev().collect()),
            outstanding: AtomicUsize::new(0),
        })
    }

    fn frame_offset(&self, handle: &FrameHandle) -> u64 {
        handle.frame() as u64 * self.segment_size as u64
    }
}

impl BackupStorage for SingleFileStorage {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn frame_count(&self) -> usize {
        self.frame_count
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
        let mut file = self.file.lock().expect("storage lock poisoned");
        file.seek(SeekFrom::Start(self.frame_offset(handle) + offset as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn flush(&self, _handle: &FrameHandle) -> Result<()> {
        let file = self.file.lock().expect("storage lock poisoned");
        file.sync_data()?;
        Ok(())
    }

    fn read(&self, handle: &FrameHandle, dst: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock().expect("storage lock poisoned");
        file.seek(SeekFrom::Start(self.frame_offset(handle)))?;
        file.read_exact(&mut dst[..self.segment_size])?;
        Ok(())
    }

    fn free(&self, handle: FrameHandle) {
        tracing::debug!(frame = handle.frame(), "freeing on-disk frame");
        self.free
            .lock()
            .expect("storage lock poisoned")
            .push(handle.frame());
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    fn quiesce(&self) -> Result<()> {
        let file = self.file.lock().expect("storage lock poisoned");
        file.sync_all()?;
        Ok(())
    }

    fn allocated_handles(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_storage(dir: &TempDir, frames: usize) -> SingleFileStorage {
        SingleFileStorage::open(dir.path().join("frames"), 64, frames).unwrap()
    }

    #[test]
    fn test_frames_at_expected_offsets() {
        let dir = TempDir::new().unwrap();
        let storage = open_test_storage(&dir, 2);
        let first = storage.allocate().unwrap();
        let second = storage.allocate().unwrap();
        storage.write(&first, 0, b"AAAA").unwrap();
        storage.write(&second, 0, b"BBBB").unwrap();
        storage.flush(&second).unwrap();

        let raw = std::fs::read(dir.path().join("frames")).unwrap();
        assert_eq!(raw.len(), 128);
        assert_eq!(&raw[0..4], b"AAAA");
        assert_eq!(&raw[64..68], b"BBBB");
        storage.free(first);
        storage.free(second);
    }

    #[test]
    fn test_write_flush_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = open_test_storage(&dir, 1);
        let handle = storage.allocate().unwrap();
        storage.write(&handle, 10, b"test").unwrap();
        storage.flush(&handle).unwrap();

        let mut dst = vec![0xFFu8; 64];
        storage.read(&handle, &mut dst).unwrap();
        assert_eq!(&dst[10..14], b"test");
        assert_eq!(dst[9], 0);
        assert_eq!(dst[14], 0);
        storage.free(handle);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let dir = TempDir::new().unwrap();
        let storage = open_test_storage(&dir, 1);
        let handle = storage.allocate().unwrap();
        assert!(matches!(storage.allocate(), Err(Error::OutOfStorage)));
        storage.free(handle);
        assert!(storage.allocate().is_ok());
    }

    #[test]
    fn test_write_past_frame_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = open_test_storage(&dir, 1);
        let handle = storage.allocate().unwrap();
        assert!(storage.write(&handle, 64, b"x").is_err());
        storage.free(handle);
    }

    #[test]
    fn test_reopen_preserves_contents() {
        let dir = TempDir::new().unwrap();
        {
            let storage = open_test_storage(&dir, 2);
            let handle = storage.allocate().unwrap();
            storage.write(&handle, 0, b"durable").unwrap();
            storage.flush(&handle).unwrap();
            storage.free(handle);
        }
        let storage = open_test_storage(&dir, 2);
        let handle = storage.allocate().unwrap();
        let mut dst = vec![0u8; 64];
        storage.read(&handle, &mut dst).unwrap();
        assert_eq!(&dst[0..7], b"durable");
        storage.free(handle);
    }
}
