//! Per-Segment State Machine
//!
//! [`SegmentInfo`] owns everything the backup holds for one
//! `(master_id, segment_id)` pair: the storage frame, the staging buffer
//! while one is checked out, and the recovery sub-segments once built.
//!
//! ## Lifecycle
//!
//! ```text
//! UNINIT ──open()──► OPEN ──close()──► CLOSED ──start_loading()──► LOADING
//!                     │                  │                            │
//!                     │ write()          │ set_recovering()           ▼
//!                     ▼                  ▼                   CLOSED (in memory)
//!                    OPEN            RECOVERING ──build──► RECOVERING (built)
//!
//! any state but FREED ──free()──► FREED
//! ```
//!
//! While OPEN the segment holds exactly one pool buffer; `close` persists the
//! buffer to the frame, flushes, and returns the buffer to the pool. Recovery
//! loads check the buffer back out, and the build releases it again once the
//! per-partition outputs exist, so a bounded pool keeps cycling under
//! recovery load instead of deadlocking.
//!
//! A `SegmentInfo` dropped while OPEN performs a best-effort close to storage
//! and logs: a backup shutting down must not silently discard bytes a master
//! believed were replicated. The drop path also releases the frame handle and
//! buffer unconditionally.
//!
//! All state lives behind one async mutex per segment; the engine's
//! membership map is locked separately and never while an info lock is held.
//! Usage counters are the exception: they sit on the write hot path and use
//! their own short-critical-section lock so both fields move together.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify};

use logvault_core::{Error, Result, Tablet};

use crate::pool::{PoolBuffer, SegmentPool};
use crate::recovery;
use crate::storage::{BackupStorage, FrameHandle};

/// States of the per-segment machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Uninit,
    Open,
    Closed,
    Loading,
    Recovering,
    Freed,
}

/// Result of a completed recovery build.
enum RecoveryOutcome {
    /// Per-partition sub-segments, indexed by partition id.
    Built(Vec<Vec<u8>>),
    /// The segment bytes were malformed; recorded once, surfaced on every
    /// recovery read.
    Failed,
}

/// Outcome of a single recovery-read poll; `Pending` means the build is
/// scheduled but not finished.
pub(crate) enum RecoveryPoll {
    Appended,
    Pending,
}

struct Inner {
    state: SegmentState,
    handle: Option<FrameHandle>,
    buffer: Option<PoolBuffer>,
    recovery: Option<RecoveryOutcome>,
    /// Set once the engine schedules this segment for recovery; recovery
    /// reads before that fail instead of waiting.
    recovery_scheduled: bool,
}

/// State machine and resource owner for one `(master_id, segment_id)`.
pub struct SegmentInfo {
    master_id: u64,
    segment_id: u64,
    segment_size: usize,
    storage: Arc<dyn BackupStorage>,
    pool: SegmentPool,
    inner: Mutex<Inner>,
    /// Signalled when a build completes (or the segment is freed).
    recovered: Notify,
    stats: SegmentStats,
}

impl SegmentInfo {
    pub fn new(
        storage: Arc<dyn BackupStorage>,
        pool: SegmentPool,
        master_id: u64,
        segment_id: u64,
    ) -> Self {
        let segment_size = storage.segment_size();
        Self {
            master_id,
            segment_id,
            segment_size,
            storage,
            pool,
            inner: Mutex::new(Inner {
                state: SegmentState::Uninit,
                handle: None,
                buffer: None,
                recovery: None,
                recovery_scheduled: false,
            }),
            recovered: Notify::new(),
            stats: SegmentStats::new(),
        }
    }

    pub fn master_id(&self) -> u64 {
        self.master_id
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    pub fn stats(&self) -> &SegmentStats {
        &self.stats
    }

    pub async fn state(&self) -> SegmentState {
        self.inner.lock().await.state
    }

    /// Whether the segment bytes are currently staged in a pool buffer.
    pub async fn in_memory(&self) -> bool {
        self.inner.lock().await.buffer.is_some()
    }

    pub async fn recovery_failed(&self) -> bool {
        matches!(
            self.inner.lock().await.recovery,
            Some(RecoveryOutcome::Failed)
        )
    }

    /// Allocate a frame and a zeroed staging buffer.
    pub async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SegmentState::Uninit {
            return Err(Error::SegmentAlreadyOpen {
                master_id: self.master_id,
                segment_id: self.segment_id,
            });
        }
        let handle = self.storage.allocate()?;
        let mut buffer = match self.pool.checkout() {
            Ok(buffer) => buffer,
            Err(err) => {
                self.storage.free(handle);
                return Err(err);
            }
        };
        buffer.zero();
        inner.handle = Some(handle);
        inner.buffer = Some(buffer);
        inner.state = SegmentState::Open;
        tracing::debug!(
            master_id = self.master_id,
            segment_id = self.segment_id,
            "segment opened"
        );
        Ok(())
    }

    /// Copy `bytes` into the staging buffer at `offset`.
    pub async fn write(&self, offset: u32, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SegmentState::Open {
            return Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not open",
            ));
        }
        let end = offset as u64 + bytes.len() as u64;
        if end > self.segment_size as u64 {
            return Err(Error::SegmentOverflow {
                offset,
                len: bytes.len() as u32,
                capacity: self.segment_size as u32,
            });
        }
        let buffer = inner.buffer.as_mut().expect("open segment without buffer");
        buffer[offset as usize..end as usize].copy_from_slice(bytes);
        self.stats.increment(bytes.len() as u64, wall_time_secs());
        Ok(())
    }

    /// Persist the staging buffer to the frame, flush, and return the buffer
    /// to the pool. On a storage error the segment stays OPEN so the master
    /// can retry the close.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SegmentState::Open {
            return Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not open",
            ));
        }
        self.persist(&mut inner).await?;
        inner.buffer = None;
        inner.state = SegmentState::Closed;
        let (live_bytes, _) = self.stats.get();
        tracing::debug!(
            master_id = self.master_id,
            segment_id = self.segment_id,
            live_bytes,
            "segment closed and flushed"
        );
        Ok(())
    }

    /// Bring a CLOSED segment's bytes back into a pool buffer. Returns once
    /// the load completes; the engine runs this on its recovery tasks, so
    /// the RPC that triggered it is never blocked on the read.
    pub async fn start_loading(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SegmentState::Closed {
            return Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not closed",
            ));
        }
        if inner.buffer.is_some() {
            return Ok(());
        }
        self.load(&mut inner).await
    }

    /// Admit partition-map input: CLOSED → RECOVERING. Idempotent on a
    /// segment already recovering.
    pub async fn set_recovering(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SegmentState::Closed | SegmentState::Recovering => {
                inner.state = SegmentState::Recovering;
                inner.recovery_scheduled = true;
                Ok(())
            }
            _ => Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not closed",
            )),
        }
    }

    /// Split the staged segment into per-partition sub-segments. Idempotent:
    /// a second call on a built segment leaves the outputs untouched. A
    /// malformed segment records the failure instead of erroring; recovery
    /// reads surface it.
    pub async fn build_recovery_segments(&self, tablets: &[Tablet]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != SegmentState::Recovering {
            return Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not recovering",
            ));
        }
        if inner.recovery.is_some() {
            return Ok(());
        }
        if inner.buffer.is_none() {
            return Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "is not in memory",
            ));
        }
        self.build(&mut inner, tablets);
        Ok(())
    }

    /// Full recovery sequence for one segment, driven by the engine off the
    /// request path: force-close if the master died mid-segment, reload from
    /// storage if needed, then build the per-partition outputs. Holds the
    /// info lock throughout so a concurrent retry observes the finished
    /// result instead of interleaving.
    pub async fn recover(&self, tablets: &[Tablet]) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.state == SegmentState::Open {
            tracing::warn!(
                master_id = self.master_id,
                segment_id = self.segment_id,
                "master crashed with segment open; closing out to storage"
            );
            if let Err(err) = self.persist(&mut inner).await {
                tracing::error!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    error = %err,
                    "best-effort close failed; frame contents undefined"
                );
            }
            // The footer may be missing; recovery of this segment will then
            // fail with SegmentRecoveryFailed, which the coordinator treats
            // as a lost tail.
            inner.state = SegmentState::Closed;
        }

        if inner.recovery.is_some() {
            return Ok(());
        }
        match inner.state {
            SegmentState::Closed | SegmentState::Recovering => {}
            _ => {
                return Err(Error::bad_segment(
                    self.master_id,
                    self.segment_id,
                    "cannot be recovered",
                ))
            }
        }

        inner.recovery_scheduled = true;
        if inner.buffer.is_none() {
            if let Err(err) = self.load(&mut inner).await {
                tracing::error!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    error = %err,
                    "failed to load segment for recovery"
                );
                inner.state = SegmentState::Recovering;
                inner.recovery = Some(RecoveryOutcome::Failed);
                self.recovered.notify_waiters();
                return Ok(());
            }
        }
        inner.state = SegmentState::Recovering;
        self.build(&mut inner, tablets);
        Ok(())
    }

    /// Append partition `partition_id`'s bytes to `out`. Fails with
    /// `BadSegmentId` if recovery never completed here, or
    /// `SegmentRecoveryFailed` if the segment was malformed.
    pub async fn append_recovery_segment(
        &self,
        partition_id: u64,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match self.poll_recovery(partition_id, out).await? {
            RecoveryPoll::Appended => Ok(()),
            RecoveryPoll::Pending => Err(Error::bad_segment(
                self.master_id,
                self.segment_id,
                "recovery still in progress",
            )),
        }
    }

    /// Non-blocking recovery read used by the engine's bounded wait.
    pub(crate) async fn poll_recovery(
        &self,
        partition_id: u64,
        out: &mut Vec<u8>,
    ) -> Result<RecoveryPoll> {
        let inner = self.inner.lock().await;
        match &inner.recovery {
            Some(RecoveryOutcome::Built(outputs)) => {
                let index = partition_id as usize;
                if index >= outputs.len() {
                    tracing::warn!(
                        master_id = self.master_id,
                        segment_id = self.segment_id,
                        partition_id,
                        partitions = outputs.len(),
                        "recovery read for partition out of range"
                    );
                    return Err(Error::bad_segment(
                        self.master_id,
                        self.segment_id,
                        "partition out of range",
                    ));
                }
                out.extend_from_slice(&outputs[index]);
                Ok(RecoveryPoll::Appended)
            }
            Some(RecoveryOutcome::Failed) => Err(Error::SegmentRecoveryFailed {
                master_id: self.master_id,
                segment_id: self.segment_id,
            }),
            None if inner.recovery_scheduled => Ok(RecoveryPoll::Pending),
            None => {
                tracing::warn!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    "recovery read for segment that was never recovered"
                );
                Err(Error::bad_segment(
                    self.master_id,
                    self.segment_id,
                    "was not recovered yet",
                ))
            }
        }
    }

    pub(crate) fn recovery_notify(&self) -> &Notify {
        &self.recovered
    }

    /// Release the frame, any staged buffer, and any recovery outputs.
    pub async fn free(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.handle.take() {
            self.storage.free(handle);
        }
        inner.buffer = None;
        inner.recovery = None;
        inner.recovery_scheduled = false;
        inner.state = SegmentState::Freed;
        // Wake any bounded waiters; they will observe the freed state.
        self.recovered.notify_waiters();
    }

    /// Write the staging buffer to the frame and flush, putting both the
    /// handle and the buffer back afterwards. Runs on the blocking pool so
    /// request threads never sit in disk I/O.
    async fn persist(&self, inner: &mut Inner) -> Result<()> {
        let handle = inner.handle.take().expect("open segment without frame");
        let buffer = inner.buffer.take().expect("open segment without buffer");
        let storage = Arc::clone(&self.storage);
        let (handle, buffer, result) = tokio::task::spawn_blocking(move || {
            let result = storage
                .write(&handle, 0, &buffer)
                .and_then(|()| storage.flush(&handle));
            (handle, buffer, result)
        })
        .await
        .expect("storage task panicked");
        inner.handle = Some(handle);
        inner.buffer = Some(buffer);
        if let Err(err) = &result {
            tracing::error!(
                master_id = self.master_id,
                segment_id = self.segment_id,
                error = %err,
                "flush failed; segment stays open"
            );
        }
        result
    }

    /// Check a buffer out of the pool (with backoff: during recovery every
    /// segment wants one, and builds release theirs as they finish) and read
    /// the frame into it.
    async fn load(&self, inner: &mut Inner) -> Result<()> {
        let previous = inner.state;
        inner.state = SegmentState::Loading;

        let mut attempts = 0u32;
        let buffer = loop {
            match self.pool.checkout() {
                Ok(buffer) => break buffer,
                Err(Error::PoolExhausted) => {
                    attempts += 1;
                    if attempts % 100 == 0 {
                        tracing::warn!(
                            master_id = self.master_id,
                            segment_id = self.segment_id,
                            attempts,
                            "recovery load waiting for a pool buffer"
                        );
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => {
                    inner.state = previous;
                    return Err(err);
                }
            }
        };

        let handle = inner.handle.take().expect("closed segment without frame");
        let storage = Arc::clone(&self.storage);
        let (handle, buffer, result) = tokio::task::spawn_blocking(move || {
            let mut buffer = buffer;
            let result = storage.read(&handle, &mut buffer);
            (handle, buffer, result)
        })
        .await
        .expect("storage task panicked");
        inner.handle = Some(handle);
        inner.state = previous;
        match result {
            Ok(()) => {
                inner.buffer = Some(buffer);
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    error = %err,
                    "failed to load segment from storage"
                );
                Err(err)
            }
        }
    }

    /// Run the partition split over the staged bytes and record the outcome,
    /// releasing the staging buffer either way.
    fn build(&self, inner: &mut Inner, tablets: &[Tablet]) {
        let buffer = inner.buffer.as_ref().expect("build without staged buffer");
        match recovery::build_recovery_segments(buffer, tablets) {
            Ok(outputs) => {
                tracing::info!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    partitions = outputs.len(),
                    "built recovery segments"
                );
                inner.recovery = Some(RecoveryOutcome::Built(outputs));
            }
            Err(err) => {
                tracing::error!(
                    master_id = self.master_id,
                    segment_id = self.segment_id,
                    error = %err,
                    "segment is malformed; recovery for it will fail"
                );
                inner.recovery = Some(RecoveryOutcome::Failed);
            }
        }
        // The staged bytes are no longer needed; free the buffer for other
        // loads before signalling readers.
        inner.buffer = None;
        self.recovered.notify_waiters();
    }
}

impl Drop for SegmentInfo {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == SegmentState::Open {
            tracing::warn!(
                master_id = self.master_id,
                segment_id = self.segment_id,
                "backup shutting down with open segment; closing out to storage"
            );
            if let (Some(handle), Some(buffer)) = (&inner.handle, &inner.buffer) {
                if let Err(err) = self
                    .storage
                    .write(handle, 0, buffer)
                    .and_then(|()| self.storage.flush(handle))
                {
                    tracing::error!(
                        master_id = self.master_id,
                        segment_id = self.segment_id,
                        error = %err,
                        "emergency close failed"
                    );
                }
            }
        }
        if let Some(handle) = inner.handle.take() {
            self.storage.free(handle);
        }
        inner.buffer = None;
    }
}

/// Live-byte and space·time counters for one segment, updated together on
/// the write path. Both fields move under one short lock so readers never
/// see an old byte count against a new product sum.
pub struct SegmentStats {
    inner: std::sync::Mutex<StatsInner>,
}

struct StatsInner {
    live_bytes: u64,
    space_time_sum: u64,
}

impl SegmentStats {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(StatsInner {
                live_bytes: 0,
                space_time_sum: 0,
            }),
        }
    }

    /// Account for `bytes` written at wall-clock `timestamp` seconds.
    pub fn increment(&self, bytes: u64, timestamp: u32) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.live_bytes = inner.live_bytes.saturating_add(bytes);
        inner.space_time_sum = inner
            .space_time_sum
            .saturating_add(bytes.saturating_mul(u64::from(timestamp)));
    }

    /// Consistent view of both counters.
    pub fn get(&self) -> (u64, u64) {
        let inner = self.inner.lock().expect("stats lock poisoned");
        (inner.live_bytes, inner.space_time_sum)
    }

    /// Average wall-clock timestamp of each live byte, zero when empty.
    pub fn average_timestamp(&self) -> u32 {
        let (live_bytes, space_time_sum) = self.get();
        if live_bytes == 0 {
            return 0;
        }
        (space_time_sum / live_bytes) as u32
    }
}

fn wall_time_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
