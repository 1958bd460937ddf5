//! Backup Server Configuration
//!
//! Controls how the backup stages and persists segments:
//!
//! - **segment_size**: Size of every segment, frame, and pool buffer (default: 8MB)
//! - **frame_count**: Number of frames the storage backend provides (default: 256)
//! - **pool_capacity**: Number of in-memory staging buffers (default: 16)
//! - **coordinator_locator**: Where the cluster coordinator lives
//! - **storage_path**: Backing file for segment frames, or `":memory:"` for
//!   the in-memory backend used by tests
//! - **recovery_read_deadline_ms**: How long a recovery read waits for a
//!   segment's build before surfacing a timeout (default: 10s)
//!
//! ## Usage
//!
//! ```ignore
//! use logvault_storage::BackupConfig;
//!
//! // Production config (on-disk frames)
//! let config = BackupConfig {
//!     storage_path: "/var/lib/logvault/frames".to_string(),
//!     ..Default::default()
//! };
//!
//! // Test config (tiny in-memory frames)
//! let config = BackupConfig {
//!     segment_size: 1024,
//!     frame_count: 2,
//!     storage_path: ":memory:".to_string(),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use logvault_core::{Error, Result, MIN_SEGMENT_SIZE};

/// Storage path value selecting the in-memory backend.
pub const MEMORY_STORAGE_PATH: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Size in bytes of every segment, storage frame, and pool buffer.
    #[serde(default = "default_segment_size")]
    pub segment_size: u32,

    /// Number of frames the storage backend provides.
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,

    /// Number of segment-size staging buffers in the pool. Should cover the
    /// expected number of concurrently open segments plus recovery loads.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Service locator of the cluster coordinator.
    #[serde(default = "default_coordinator_locator")]
    pub coordinator_locator: String,

    /// Backing file for segment frames, or `":memory:"`.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Upper bound on how long a recovery read waits for a segment build.
    #[serde(default = "default_recovery_read_deadline_ms")]
    pub recovery_read_deadline_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
            frame_count: default_frame_count(),
            pool_capacity: default_pool_capacity(),
            coordinator_locator: default_coordinator_locator(),
            storage_path: default_storage_path(),
            recovery_read_deadline_ms: default_recovery_read_deadline_ms(),
        }
    }
}

impl BackupConfig {
    /// Check the configuration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        if (self.segment_size as usize) < MIN_SEGMENT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "segment_size {} below minimum {} (header + footer)",
                self.segment_size, MIN_SEGMENT_SIZE
            )));
        }
        if self.frame_count == 0 {
            return Err(Error::InvalidConfig("frame_count must be at least 1".into()));
        }
        if self.pool_capacity == 0 {
            return Err(Error::InvalidConfig(
                "pool_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn uses_memory_storage(&self) -> bool {
        self.storage_path == MEMORY_STORAGE_PATH
    }

    pub fn recovery_read_deadline(&self) -> Duration {
        Duration::from_millis(self.recovery_read_deadline_ms)
    }
}

fn default_segment_size() -> u32 {
    8 * 1024 * 1024 // 8MB
}

fn default_frame_count() -> usize {
    256
}

fn default_pool_capacity() -> usize {
    16
}

fn default_coordinator_locator() -> String {
    "127.0.0.1:12246".to_string()
}

fn default_storage_path() -> String {
    MEMORY_STORAGE_PATH.to_string()
}

fn default_recovery_read_deadline_ms() -> u64 {
    10_000
}
