//! Engine lifecycle integration tests: the open/write/close/free surface a
//! master drives, including storage exhaustion and leak accounting.

use std::sync::Arc;

use logvault_core::Error;
use logvault_storage::{BackupConfig, BackupEngine, BackupStorage, InMemoryStorage};

const SEGMENT_SIZE: usize = 1024;

fn engine_with_frames(frames: usize) -> (Arc<InMemoryStorage>, BackupEngine) {
    let storage = Arc::new(InMemoryStorage::new(SEGMENT_SIZE, frames));
    let config = BackupConfig {
        segment_size: SEGMENT_SIZE as u32,
        frame_count: frames,
        pool_capacity: 4,
        ..Default::default()
    };
    let engine = BackupEngine::with_storage(config, storage.clone() as Arc<dyn BackupStorage>);
    (storage, engine)
}

#[tokio::test]
async fn test_simple_round_trip() {
    // open(99,88); write at 10; close. The frame holds the bytes at the
    // written offset and zeroes around them.
    let (storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();
    engine.write_segment(99, 88, 10, b"test").await.unwrap();
    engine.close_segment(99, 88).await.unwrap();

    let frame = storage.frame_contents(0);
    assert_eq!(&frame[10..14], b"test");
    assert_eq!(frame[9], 0);
    assert_eq!(frame[14], 0);
    assert_eq!(storage.allocated_handles(), 1);
}

#[tokio::test]
async fn test_out_of_storage_third_open() {
    // Two frames: the third open fails and the first two stay usable.
    let (storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 86).await.unwrap();
    engine.open_segment(99, 87).await.unwrap();
    assert!(matches!(
        engine.open_segment(99, 88).await,
        Err(Error::OutOfStorage)
    ));
    assert_eq!(storage.allocated_handles(), 2);

    engine.write_segment(99, 86, 0, b"still open").await.unwrap();
    engine.write_segment(99, 87, 0, b"still open").await.unwrap();
}

#[tokio::test]
async fn test_close_before_open() {
    // close on an unknown segment fails and allocates nothing.
    let (storage, engine) = engine_with_frames(2);
    assert!(matches!(
        engine.close_segment(99, 88).await,
        Err(Error::BadSegmentId { .. })
    ));
    assert_eq!(storage.allocated_handles(), 0);
}

#[tokio::test]
async fn test_write_after_close_rejected() {
    let (storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();
    engine.close_segment(99, 88).await.unwrap();
    assert!(matches!(
        engine.write_segment(99, 88, 0, b"test").await,
        Err(Error::BadSegmentId { .. })
    ));
    assert_eq!(storage.allocated_handles(), 1);
}

#[tokio::test]
async fn test_write_bounds() {
    let (_storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();

    // Bad offset with empty payload.
    assert!(matches!(
        engine.write_segment(99, 88, 500_000, b"").await,
        Err(Error::SegmentOverflow { .. })
    ));
    // Payload longer than the segment.
    let oversized = vec![0u8; SEGMENT_SIZE + 1];
    assert!(matches!(
        engine.write_segment(99, 88, 0, &oversized).await,
        Err(Error::SegmentOverflow { .. })
    ));
    // Offset and length each fit; their sum does not.
    let half = vec![0u8; SEGMENT_SIZE / 2 + 1];
    assert!(matches!(
        engine
            .write_segment(99, 88, (SEGMENT_SIZE / 2) as u32, &half)
            .await,
        Err(Error::SegmentOverflow { .. })
    ));
    // The exact boundary fits.
    let half = vec![0u8; SEGMENT_SIZE / 2];
    engine
        .write_segment(99, 88, (SEGMENT_SIZE / 2) as u32, &half)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_free_reclaims_frame_for_new_segment() {
    let (storage, engine) = engine_with_frames(1);
    engine.open_segment(99, 88).await.unwrap();
    assert!(matches!(
        engine.open_segment(99, 89).await,
        Err(Error::OutOfStorage)
    ));
    engine.free_segment(99, 88).await.unwrap();
    assert_eq!(storage.allocated_handles(), 0);
    engine.open_segment(99, 89).await.unwrap();
    assert_eq!(storage.allocated_handles(), 1);
}

#[tokio::test]
async fn test_free_open_segment() {
    // Freeing an open segment releases its frame and buffer immediately.
    let (storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();
    engine.free_segment(99, 88).await.unwrap();
    assert_eq!(storage.allocated_handles(), 0);
    assert_eq!(engine.pool().outstanding(), 0);
    assert!(matches!(
        engine.free_segment(99, 88).await,
        Err(Error::BadSegmentId { .. })
    ));
}

#[tokio::test]
async fn test_reopen_after_close_rejected() {
    // A closed segment still occupies its id; reopening is an error.
    let (_storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();
    engine.close_segment(99, 88).await.unwrap();
    assert!(matches!(
        engine.open_segment(99, 88).await,
        Err(Error::SegmentAlreadyOpen { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_persists_open_segments() {
    let (storage, engine) = engine_with_frames(2);
    engine.open_segment(99, 88).await.unwrap();
    engine.write_segment(99, 88, 0, b"unflushed").await.unwrap();
    engine.shutdown().await;

    let frame = storage.frame_contents(0);
    assert_eq!(&frame[0..9], b"unflushed");
}
