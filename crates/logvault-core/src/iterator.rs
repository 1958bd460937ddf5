//! Segment Iterators
//!
//! Two forward iterators over entry sequences:
//!
//! - [`SegmentIterator`] walks a full segment image. Construction validates
//!   the whole range (header first, every entry in bounds, a footer present,
//!   footer checksum matching) so a torn or truncated segment left behind by
//!   a crashing master is rejected before any entry is served. After
//!   validation the cursor operations are infallible.
//! - [`RecoverySegmentIterator`] walks a recovery sub-segment: a bare run of
//!   entries with no header, footer, or checksum. Masters use it to replay
//!   the per-partition data a backup returns from a recovery read.
//!
//! Both iterators are read-only views; they never touch the underlying bytes.
//!
//! ## Validation Rules (strict iterator)
//!
//! Construction fails with `MalformedSegment` if:
//! 1. any entry's length would run past the end of the buffer;
//! 2. the first entry is not a `SegHeader`;
//! 3. no `SegFooter` is reached before the end of the capacity;
//! 4. the footer checksum does not match the checksum of the preceding bytes.

use crate::entry::{
    segment_checksum, EntryHeader, EntryType, SegmentFooter, ENTRY_HEADER_SIZE,
};
use crate::error::{Error, Result};

/// Strict forward iterator over a validated segment image.
#[derive(Debug)]
pub struct SegmentIterator<'a> {
    data: &'a [u8],
    /// Offset of the current entry's header, when not done.
    offset: usize,
    current: EntryHeader,
    done: bool,
}

impl<'a> SegmentIterator<'a> {
    /// Validate `data` as a complete segment and position the cursor on the
    /// header entry.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Self::validate(data)?;
        let current = EntryHeader::decode(data)?;
        Ok(Self {
            data,
            offset: 0,
            current,
            done: false,
        })
    }

    /// Full validation walk. Checks every entry against the rules above and
    /// verifies the footer checksum.
    fn validate(data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        let mut first = true;
        loop {
            if offset + ENTRY_HEADER_SIZE > data.len() {
                return Err(Error::MalformedSegment("no footer before end of segment"));
            }
            let header = EntryHeader::decode(&data[offset..])?;
            if first && header.entry_type != EntryType::SegHeader {
                return Err(Error::MalformedSegment("first entry is not a segment header"));
            }
            first = false;

            let payload_start = offset + ENTRY_HEADER_SIZE;
            let payload_end = payload_start
                .checked_add(header.length as usize)
                .ok_or(Error::MalformedSegment("entry length overflow"))?;
            if payload_end > data.len() {
                return Err(Error::MalformedSegment("entry overruns segment"));
            }

            if header.entry_type == EntryType::SegFooter {
                let footer = SegmentFooter::decode(&data[payload_start..payload_end])?;
                let computed = segment_checksum(&data[..payload_start]);
                if footer.checksum != computed {
                    return Err(Error::MalformedSegment("footer checksum mismatch"));
                }
                return Ok(());
            }
            offset = payload_end;
        }
    }

    /// True once the cursor has advanced past the footer.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Type of the current entry.
    ///
    /// # Panics
    /// Panics if the iterator is done; check [`is_done`](Self::is_done) first.
    pub fn entry_type(&self) -> EntryType {
        assert!(!self.done, "iterator exhausted");
        self.current.entry_type
    }

    /// Payload length of the current entry.
    pub fn length(&self) -> u32 {
        assert!(!self.done, "iterator exhausted");
        self.current.length
    }

    /// Payload bytes of the current entry.
    pub fn payload(&self) -> &'a [u8] {
        assert!(!self.done, "iterator exhausted");
        let start = self.offset + ENTRY_HEADER_SIZE;
        &self.data[start..start + self.current.length as usize]
    }

    /// The whole current entry, header included, as it sits in the segment.
    pub fn raw_entry(&self) -> &'a [u8] {
        assert!(!self.done, "iterator exhausted");
        let end = self.offset + ENTRY_HEADER_SIZE + self.current.length as usize;
        &self.data[self.offset..end]
    }

    /// Step to the next entry; stepping past the footer finishes iteration.
    pub fn advance(&mut self) {
        assert!(!self.done, "iterator exhausted");
        if self.current.entry_type == EntryType::SegFooter {
            self.done = true;
            return;
        }
        self.offset += ENTRY_HEADER_SIZE + self.current.length as usize;
        // Validated in new(): every entry up to the footer decodes cleanly.
        self.current = EntryHeader::decode(&self.data[self.offset..])
            .expect("validated segment entry failed to decode");
    }
}

/// Lax forward iterator over a recovery sub-segment: entries back to back
/// until the buffer ends. Fails construction only on a truncated or
/// unrecognizable entry.
pub struct RecoverySegmentIterator<'a> {
    data: &'a [u8],
    offset: usize,
    current: Option<EntryHeader>,
}

impl<'a> RecoverySegmentIterator<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        // Walk once so cursor operations cannot fail midway.
        let mut offset = 0usize;
        while offset < data.len() {
            let header = EntryHeader::decode(&data[offset..])?;
            let end = offset + ENTRY_HEADER_SIZE + header.length as usize;
            if end > data.len() {
                return Err(Error::MalformedSegment("entry overruns recovery segment"));
            }
            offset = end;
        }
        let current = if data.is_empty() {
            None
        } else {
            Some(EntryHeader::decode(data)?)
        };
        Ok(Self {
            data,
            offset: 0,
            current,
        })
    }

    pub fn is_done(&self) -> bool {
        self.current.is_none()
    }

    pub fn entry_type(&self) -> EntryType {
        self.current.expect("iterator exhausted").entry_type
    }

    pub fn length(&self) -> u32 {
        self.current.expect("iterator exhausted").length
    }

    pub fn payload(&self) -> &'a [u8] {
        let header = self.current.expect("iterator exhausted");
        let start = self.offset + ENTRY_HEADER_SIZE;
        &self.data[start..start + header.length as usize]
    }

    pub fn advance(&mut self) {
        let header = self.current.expect("iterator exhausted");
        self.offset += ENTRY_HEADER_SIZE + header.length as usize;
        self.current = if self.offset == self.data.len() {
            None
        } else {
            Some(
                EntryHeader::decode(&self.data[self.offset..])
                    .expect("validated recovery entry failed to decode"),
            )
        };
    }
}
