//! Core types for the logvault backup server: the segment entry format, the
//! strict and recovery-side iterators, the segment builder, and the tablet
//! map used to partition entries during recovery.

pub mod builder;
pub mod entry;
pub mod error;
pub mod iterator;
pub mod tablet;

pub use builder::SegmentBuilder;
pub use entry::{
    segment_checksum, EntryHeader, EntryType, ObjectHeader, SegmentFooter, SegmentHeader,
    Tombstone, ENTRY_HEADER_SIZE, MIN_SEGMENT_SIZE,
};
pub use error::{Error, Result};
pub use iterator::{RecoverySegmentIterator, SegmentIterator};
pub use tablet::{Tablet, TabletState};
