//! Error Types for Logvault
//!
//! This module defines the error enum shared by the backup core. Each variant
//! maps one-to-one onto a wire status code, so the RPC layer can translate an
//! operation failure into the status a master expects without inspecting
//! message strings.
//!
//! ## Error Categories
//!
//! ### State-machine errors
//! - `BadSegmentId`: the segment is not in the state the operation requires
//!   (write to a closed segment, recovery read before recovery started, ...)
//! - `SegmentAlreadyOpen`: OPEN_SEGMENT for a segment that already exists
//! - `SegmentOverflow`: a write would run past the segment capacity
//!
//! ### Resource errors
//! - `OutOfStorage`: no free frame in the storage backend
//! - `PoolExhausted`: no free staging buffer (internal; callers back off)
//!
//! ### Recovery errors
//! - `MalformedSegment`: the segment bytes failed iteration/checksum
//! - `SegmentRecoveryFailed`: recorded once per segment whose build failed;
//!   surfaced on every subsequent recovery read for that segment
//!
//! ## Usage
//!
//! All fallible operations return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagates cleanly across crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment not in the expected state for the requested operation.
    #[error("bad segment id: segment <{master_id},{segment_id}> {reason}")]
    BadSegmentId {
        master_id: u64,
        segment_id: u64,
        reason: &'static str,
    },

    #[error("segment <{master_id},{segment_id}> is already open")]
    SegmentAlreadyOpen { master_id: u64, segment_id: u64 },

    #[error("write of {len} bytes at offset {offset} overflows segment capacity {capacity}")]
    SegmentOverflow {
        offset: u32,
        len: u32,
        capacity: u32,
    },

    #[error("no free storage frames")]
    OutOfStorage,

    #[error("segment pool exhausted")]
    PoolExhausted,

    #[error("malformed segment: {0}")]
    MalformedSegment(&'static str),

    #[error("recovery failed for segment <{master_id},{segment_id}>")]
    SegmentRecoveryFailed { master_id: u64, segment_id: u64 },

    #[error("caller {0} is not in the cluster")]
    CallerNotInCluster(u64),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for the most common state-machine failure.
    pub fn bad_segment(master_id: u64, segment_id: u64, reason: &'static str) -> Self {
        Error::BadSegmentId {
            master_id,
            segment_id,
            reason,
        }
    }
}
