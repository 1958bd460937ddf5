//! Backup Engine
//!
//! The process-wide façade masters and the coordinator talk to. Routes each
//! request to the right [`SegmentInfo`], runs recovery (load + partition +
//! serve), and manages segment lifecycle across masters.
//!
//! ## Structure
//!
//! - One membership map `(master_id, segment_id) → Arc<SegmentInfo>` behind a
//!   plain mutex. The map lock only guards membership changes; per-segment
//!   work happens under each info's own lock. Lock order is always
//!   map → info → pool/storage, never re-entrant.
//! - One shared [`SegmentPool`] and one shared storage backend.
//! - Recovery work runs on spawned tasks, with disk reads pushed to the
//!   blocking pool, so foreground segment writes are never stuck behind
//!   recovery I/O.
//!
//! ## Recovery flow
//!
//! `start_reading_data` snapshots the failed master's segments, returns their
//! ids immediately, and kicks off one task per segment: force-close if the
//! master died mid-segment, reload the frame if the bytes are no longer
//! staged, then build the per-partition sub-segments. `get_recovery_data`
//! waits (bounded by the configured deadline) for the build of its segment,
//! then appends the requested partition's bytes. A timed-out read leaves the
//! build running; a retry observes its result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use logvault_core::{Error, Result, Tablet, TabletState};

use crate::config::BackupConfig;
use crate::pool::SegmentPool;
use crate::segment::{RecoveryPoll, SegmentInfo};
use crate::storage::{open_storage, BackupStorage};

pub struct BackupEngine {
    config: BackupConfig,
    storage: Arc<dyn BackupStorage>,
    pool: SegmentPool,
    segments: Mutex<HashMap<(u64, u64), Arc<SegmentInfo>>>,
}

impl BackupEngine {
    /// Build an engine with the backend selected by `config.storage_path`.
    pub fn new(config: BackupConfig) -> Result<Self> {
        config.validate()?;
        let storage = open_storage(&config)?;
        Ok(Self::with_storage(config, storage))
    }

    /// Build an engine over an existing backend; used by tests that need to
    /// inspect the backend directly.
    pub fn with_storage(config: BackupConfig, storage: Arc<dyn BackupStorage>) -> Self {
        let pool = SegmentPool::new(storage.segment_size(), config.pool_capacity);
        Self {
            config,
            storage,
            pool,
            segments: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn BackupStorage> {
        &self.storage
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Number of segments currently tracked (any state but freed).
    pub fn segment_count(&self) -> usize {
        self.segments.lock().expect("segment map poisoned").len()
    }

    fn find(&self, master_id: u64, segment_id: u64) -> Option<Arc<SegmentInfo>> {
        self.segments
            .lock()
            .expect("segment map poisoned")
            .get(&(master_id, segment_id))
            .cloned()
    }

    /// Create and open a new segment for `(master_id, segment_id)`.
    pub async fn open_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let info = {
            let mut segments = self.segments.lock().expect("segment map poisoned");
            if segments.contains_key(&(master_id, segment_id)) {
                return Err(Error::SegmentAlreadyOpen {
                    master_id,
                    segment_id,
                });
            }
            let info = Arc::new(SegmentInfo::new(
                Arc::clone(&self.storage),
                self.pool.clone(),
                master_id,
                segment_id,
            ));
            segments.insert((master_id, segment_id), Arc::clone(&info));
            info
        };

        match info.open().await {
            Ok(()) => Ok(()),
            Err(err) => {
                // No frame was retained; forget the entry so the id can be
                // reused once resources free up.
                self.segments
                    .lock()
                    .expect("segment map poisoned")
                    .remove(&(master_id, segment_id));
                Err(err)
            }
        }
    }

    /// Append `bytes` at `offset` within an open segment.
    pub async fn write_segment(
        &self,
        master_id: u64,
        segment_id: u64,
        offset: u32,
        bytes: &[u8],
    ) -> Result<()> {
        let info = self
            .find(master_id, segment_id)
            .ok_or_else(|| Error::bad_segment(master_id, segment_id, "is not open"))?;
        info.write(offset, bytes).await
    }

    /// Persist and close an open segment. Returns once the flush is durable.
    pub async fn close_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let info = self
            .find(master_id, segment_id)
            .ok_or_else(|| Error::bad_segment(master_id, segment_id, "is not open"))?;
        info.close().await
    }

    /// Release a segment's frame and buffer and forget it.
    pub async fn free_segment(&self, master_id: u64, segment_id: u64) -> Result<()> {
        let info = self
            .segments
            .lock()
            .expect("segment map poisoned")
            .remove(&(master_id, segment_id))
            .ok_or_else(|| Error::bad_segment(master_id, segment_id, "does not exist"))?;
        info.free().await;
        tracing::debug!(master_id, segment_id, "segment freed");
        Ok(())
    }

    /// Begin recovery for `master_id`: returns the ids of all segments this
    /// backup holds for it and schedules load + build for each. Non-blocking
    /// with respect to the builds. Only RECOVERING tablet records are kept.
    pub async fn start_reading_data(&self, master_id: u64, tablets: Vec<Tablet>) -> Vec<u64> {
        let tablets: Arc<Vec<Tablet>> = Arc::new(
            tablets
                .into_iter()
                .filter(|tablet| tablet.state == TabletState::Recovering)
                .collect(),
        );

        let mut infos: Vec<Arc<SegmentInfo>> = {
            let segments = self.segments.lock().expect("segment map poisoned");
            segments
                .values()
                .filter(|info| info.master_id() == master_id)
                .cloned()
                .collect()
        };
        infos.sort_by_key(|info| info.segment_id());

        tracing::info!(
            master_id,
            segments = infos.len(),
            tablets = tablets.len(),
            "starting recovery reads"
        );

        let mut segment_ids = Vec::with_capacity(infos.len());
        for info in infos {
            segment_ids.push(info.segment_id());
            let tablets = Arc::clone(&tablets);
            tokio::spawn(async move {
                if let Err(err) = info.recover(&tablets).await {
                    tracing::error!(
                        master_id = info.master_id(),
                        segment_id = info.segment_id(),
                        error = %err,
                        "recovery task failed"
                    );
                }
            });
        }
        segment_ids
    }

    /// Append partition `partition_id` of segment `(master_id, segment_id)`
    /// to `out`, waiting up to the configured deadline for the build.
    pub async fn get_recovery_data(
        &self,
        master_id: u64,
        segment_id: u64,
        partition_id: u64,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let info = self
            .find(master_id, segment_id)
            .ok_or_else(|| Error::bad_segment(master_id, segment_id, "is unknown"))?;

        let deadline_duration = self.config.recovery_read_deadline();
        let deadline = tokio::time::Instant::now() + deadline_duration;
        loop {
            // Register for the completion signal before checking state, so a
            // build finishing in between cannot be missed.
            let notified = info.recovery_notify().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match info.poll_recovery(partition_id, out).await? {
                RecoveryPoll::Appended => return Ok(()),
                RecoveryPoll::Pending => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        tracing::warn!(
                            master_id,
                            segment_id,
                            partition_id,
                            "recovery read timed out waiting for build"
                        );
                        return Err(Error::Timeout(deadline_duration));
                    }
                }
            }
        }
    }

    /// Quiesce for shutdown: persist any still-open segments (the emergency
    /// close) and flush the backend. Closed segments stay on storage for a
    /// restarted backup.
    pub async fn shutdown(&self) {
        let infos: Vec<Arc<SegmentInfo>> = {
            let segments = self.segments.lock().expect("segment map poisoned");
            segments.values().cloned().collect()
        };
        for info in infos {
            // recover() would also build; all we want here is the persist
            // part, which close() provides for open segments.
            if let Err(err) = info.close().await {
                if !matches!(err, Error::BadSegmentId { .. }) {
                    tracing::error!(
                        master_id = info.master_id(),
                        segment_id = info.segment_id(),
                        error = %err,
                        "failed to persist open segment during shutdown"
                    );
                }
            } else {
                tracing::warn!(
                    master_id = info.master_id(),
                    segment_id = info.segment_id(),
                    "open segment persisted during shutdown"
                );
            }
        }
        if let Err(err) = self.storage.quiesce() {
            tracing::error!(error = %err, "storage quiesce failed during shutdown");
        }
        tracing::info!("backup engine shut down");
    }
}
