//! Segment Builder
//!
//! Assembles a well-formed segment image: header entry first, data entries in
//! append order, footer entry with the running checksum last. Masters build
//! segments this way before streaming them to backups; tests use it to
//! produce valid fixtures without hand-computing checksums.
//!
//! The builder tracks capacity so a segment that would not fit its footer is
//! rejected at append time rather than truncated at finish time.

use bytes::BufMut;

use crate::entry::{
    segment_checksum, EntryHeader, EntryType, ObjectHeader, SegmentFooter, SegmentHeader,
    Tombstone, ENTRY_HEADER_SIZE, MIN_SEGMENT_SIZE,
};
use crate::error::{Error, Result};

/// Builds a segment image up to a fixed capacity.
pub struct SegmentBuilder {
    data: Vec<u8>,
    capacity: u32,
}

impl SegmentBuilder {
    /// Start a segment for `(log_id, segment_id)`, writing the header entry.
    pub fn new(log_id: u64, segment_id: u64, capacity: u32) -> Result<Self> {
        if (capacity as usize) < MIN_SEGMENT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "segment capacity {} below minimum {}",
                capacity, MIN_SEGMENT_SIZE
            )));
        }
        let mut builder = Self {
            data: Vec::with_capacity(capacity as usize),
            capacity,
        };
        let header = SegmentHeader {
            log_id,
            segment_id,
            segment_capacity: capacity,
        };
        let mut payload = Vec::with_capacity(SegmentHeader::SIZE);
        header.encode(&mut payload);
        builder.append_entry(EntryType::SegHeader, &payload)?;
        Ok(builder)
    }

    /// Append an object entry. The object checksum is computed over the value
    /// the way masters compute it.
    pub fn append_object(
        &mut self,
        table_id: u64,
        object_id: u64,
        version: u64,
        value: &[u8],
    ) -> Result<()> {
        let header = ObjectHeader {
            table_id,
            object_id,
            version,
            checksum: segment_checksum(value),
            data_len: value.len() as u32,
        };
        let mut payload = Vec::with_capacity(ObjectHeader::SIZE + value.len());
        header.encode(&mut payload);
        payload.put_slice(value);
        self.append_entry(EntryType::Object, &payload)
    }

    /// Append a tombstone entry.
    pub fn append_tombstone(&mut self, tombstone: Tombstone) -> Result<()> {
        let mut payload = Vec::with_capacity(Tombstone::SIZE);
        tombstone.encode(&mut payload);
        self.append_entry(EntryType::ObjectTombstone, &payload)
    }

    /// Bytes appended so far (header entry included, footer not).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append the footer and return the segment image. The returned bytes are
    /// the written prefix; the rest of the segment stays zero.
    pub fn finish(mut self) -> Vec<u8> {
        // Room for the footer was reserved by every append.
        let mut entry = Vec::with_capacity(ENTRY_HEADER_SIZE);
        EntryHeader::new(EntryType::SegFooter, SegmentFooter::SIZE as u32).encode(&mut entry);
        self.data.extend_from_slice(&entry);

        let footer = SegmentFooter {
            checksum: segment_checksum(&self.data),
        };
        let mut payload = Vec::with_capacity(SegmentFooter::SIZE);
        footer.encode(&mut payload);
        self.data.extend_from_slice(&payload);
        self.data
    }

    fn append_entry(&mut self, entry_type: EntryType, payload: &[u8]) -> Result<()> {
        let needed = ENTRY_HEADER_SIZE + payload.len();
        let footer_room = ENTRY_HEADER_SIZE + SegmentFooter::SIZE;
        if self.data.len() + needed + footer_room > self.capacity as usize {
            return Err(Error::SegmentOverflow {
                offset: self.data.len() as u32,
                len: needed as u32,
                capacity: self.capacity,
            });
        }
        EntryHeader::new(entry_type, payload.len() as u32).encode(&mut self.data);
        self.data.extend_from_slice(payload);
        Ok(())
    }
}
