//! Backup-side storage for logvault: the frame-allocating storage backends,
//! the bounded segment pool, the per-segment state machine, the recovery
//! partitioner, and the [`BackupEngine`] façade that ties them together.

pub mod config;
pub mod engine;
pub mod pool;
pub mod recovery;
pub mod segment;
pub mod storage;

pub use config::{BackupConfig, MEMORY_STORAGE_PATH};
pub use engine::BackupEngine;
pub use pool::{PoolBuffer, SegmentPool};
pub use recovery::{build_recovery_segments, partition_count, which_partition};
pub use segment::{SegmentInfo, SegmentState, SegmentStats};
pub use storage::{
    open_storage, BackupStorage, FrameHandle, InMemoryStorage, SingleFileStorage,
};
