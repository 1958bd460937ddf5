//! Segment Entry Format
//!
//! This module implements the binary layout of a log segment as replicated to
//! backups. A segment is a fixed-capacity byte region containing a header
//! entry, zero or more data entries, and a footer entry; bytes after the
//! footer are unused and stay zero.
//!
//! ## Segment Layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ SegHeader entry                                           │
//! │ - log_id (8 bytes)                                        │
//! │ - segment_id (8 bytes)                                    │
//! │ - segment_capacity (4 bytes)                              │
//! ├───────────────────────────────────────────────────────────┤
//! │ Object / ObjectTombstone entries (0 or more)              │
//! ├───────────────────────────────────────────────────────────┤
//! │ SegFooter entry                                           │
//! │ - checksum (8 bytes), covers every byte before it         │
//! ├───────────────────────────────────────────────────────────┤
//! │ unused (zero) up to segment capacity                      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entry is a 5-byte header followed by its payload:
//!
//! ```text
//! ┌──────────┬─────────────────┬──────────────────┐
//! │ type     │ length          │ payload          │
//! │ (1 byte) │ (4 bytes, BE)   │ (length bytes)   │
//! └──────────┴─────────────────┴──────────────────┘
//! ```
//!
//! The footer checksum is computed over all bytes from the start of the
//! segment through the byte preceding the footer payload, so it covers
//! the footer's own `{type, length}` header. A master that crashes mid-write
//! leaves either no footer or a checksum mismatch; either way the segment is
//! detected as malformed at recovery time instead of yielding garbage entries.
//!
//! All integers are big-endian, encoded with `bytes::{Buf, BufMut}`.
//!
//! Type byte 0 is deliberately unassigned: a zero-filled staging buffer that
//! was never written decodes to an invalid type immediately.

use bytes::{Buf, BufMut};
use crc32fast::Hasher;

use crate::error::{Error, Result};

/// Size of the `{type, length}` header preceding every entry payload.
pub const ENTRY_HEADER_SIZE: usize = 5;

/// Smallest segment that can hold a header entry and a footer entry.
pub const MIN_SEGMENT_SIZE: usize =
    ENTRY_HEADER_SIZE + SegmentHeader::SIZE + ENTRY_HEADER_SIZE + SegmentFooter::SIZE;

/// Entry type tags. Zero is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    SegHeader = 1,
    Object = 2,
    ObjectTombstone = 3,
    SegFooter = 4,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryType::SegHeader),
            2 => Ok(EntryType::Object),
            3 => Ok(EntryType::ObjectTombstone),
            4 => Ok(EntryType::SegFooter),
            _ => Err(Error::MalformedSegment("unknown entry type")),
        }
    }
}

/// The `{type, length}` pair preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub entry_type: EntryType,
    pub length: u32,
}

impl EntryHeader {
    pub fn new(entry_type: EntryType, length: u32) -> Self {
        Self { entry_type, length }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.entry_type as u8);
        buf.put_u32(self.length);
    }

    /// Decode an entry header from the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_HEADER_SIZE {
            return Err(Error::MalformedSegment("truncated entry header"));
        }
        let mut cursor = bytes;
        let entry_type = EntryType::try_from(cursor.get_u8())?;
        let length = cursor.get_u32();
        Ok(Self { entry_type, length })
    }
}

/// Payload of a `SegHeader` entry. Written first by the master so a segment
/// read back from storage self-identifies without out-of-band metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Log (master) the segment belongs to.
    pub log_id: u64,
    /// Position of the segment within that log.
    pub segment_id: u64,
    /// Capacity the master allocated; backups stage the same size.
    pub segment_capacity: u32,
}

impl SegmentHeader {
    pub const SIZE: usize = 20;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.log_id);
        buf.put_u64(self.segment_id);
        buf.put_u32(self.segment_capacity);
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::SIZE {
            return Err(Error::MalformedSegment("bad segment header length"));
        }
        let mut cursor = payload;
        Ok(Self {
            log_id: cursor.get_u64(),
            segment_id: cursor.get_u64(),
            segment_capacity: cursor.get_u32(),
        })
    }
}

/// Fixed-size prefix of an `Object` entry payload; the object value bytes
/// follow it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub table_id: u64,
    pub object_id: u64,
    pub version: u64,
    /// Master-computed checksum of the object value; opaque to the backup.
    pub checksum: u64,
    pub data_len: u32,
}

impl ObjectHeader {
    pub const SIZE: usize = 36;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.table_id);
        buf.put_u64(self.object_id);
        buf.put_u64(self.version);
        buf.put_u64(self.checksum);
        buf.put_u32(self.data_len);
    }

    /// Decode an object entry payload, returning the header and value bytes.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < Self::SIZE {
            return Err(Error::MalformedSegment("truncated object entry"));
        }
        let (mut cursor, data) = payload.split_at(Self::SIZE);
        let header = Self {
            table_id: cursor.get_u64(),
            object_id: cursor.get_u64(),
            version: cursor.get_u64(),
            checksum: cursor.get_u64(),
            data_len: cursor.get_u32(),
        };
        if header.data_len as usize != data.len() {
            return Err(Error::MalformedSegment("object data length mismatch"));
        }
        Ok((header, data))
    }
}

/// Payload of an `ObjectTombstone` entry: a deletion marker that must land in
/// the same recovery partition as the object it deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    /// Segment the deleted object lived in.
    pub segment_id: u64,
    pub table_id: u64,
    pub object_id: u64,
    pub version: u64,
}

impl Tombstone {
    pub const SIZE: usize = 32;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.segment_id);
        buf.put_u64(self.table_id);
        buf.put_u64(self.object_id);
        buf.put_u64(self.version);
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::SIZE {
            return Err(Error::MalformedSegment("bad tombstone length"));
        }
        let mut cursor = payload;
        Ok(Self {
            segment_id: cursor.get_u64(),
            table_id: cursor.get_u64(),
            object_id: cursor.get_u64(),
            version: cursor.get_u64(),
        })
    }
}

/// Payload of a `SegFooter` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    pub checksum: u64,
}

impl SegmentFooter {
    pub const SIZE: usize = 8;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.checksum);
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::SIZE {
            return Err(Error::MalformedSegment("bad footer length"));
        }
        let mut cursor = payload;
        Ok(Self {
            checksum: cursor.get_u64(),
        })
    }
}

/// Checksum over a byte range, as stored in the footer. CRC32 zero-extended
/// into the 8-byte wire field.
pub fn segment_checksum(bytes: &[u8]) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    u64::from(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // ---------------------------------------------------------------
    // EntryType
    // ---------------------------------------------------------------

    #[test]
    fn test_entry_type_roundtrip() {
        for t in [
            EntryType::SegHeader,
            EntryType::Object,
            EntryType::ObjectTombstone,
            EntryType::SegFooter,
        ] {
            assert_eq!(EntryType::try_from(t as u8).unwrap(), t);
        }
    }

    #[test]
    fn test_entry_type_zero_invalid() {
        assert!(EntryType::try_from(0u8).is_err());
    }

    #[test]
    fn test_entry_type_unknown_invalid() {
        for v in [5u8, 42, 255] {
            assert!(EntryType::try_from(v).is_err(), "value {} should fail", v);
        }
    }

    // ---------------------------------------------------------------
    // EntryHeader
    // ---------------------------------------------------------------

    #[test]
    fn test_entry_header_encode_decode() {
        let header = EntryHeader::new(EntryType::Object, 1234);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), ENTRY_HEADER_SIZE);
        assert_eq!(EntryHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_entry_header_wire_layout() {
        let header = EntryHeader::new(EntryType::SegFooter, 8);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf[0], 4);
        assert_eq!(&buf[1..5], &[0, 0, 0, 8]);
    }

    #[test]
    fn test_entry_header_truncated() {
        assert!(EntryHeader::decode(&[2, 0, 0]).is_err());
        assert!(EntryHeader::decode(&[]).is_err());
    }

    // ---------------------------------------------------------------
    // SegmentHeader
    // ---------------------------------------------------------------

    #[test]
    fn test_segment_header_roundtrip() {
        let header = SegmentHeader {
            log_id: 99,
            segment_id: 88,
            segment_capacity: 1 << 20,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), SegmentHeader::SIZE);
        assert_eq!(SegmentHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_segment_header_wrong_length() {
        assert!(SegmentHeader::decode(&[0u8; 19]).is_err());
        assert!(SegmentHeader::decode(&[0u8; 21]).is_err());
    }

    // ---------------------------------------------------------------
    // ObjectHeader
    // ---------------------------------------------------------------

    #[test]
    fn test_object_roundtrip() {
        let object = ObjectHeader {
            table_id: 123,
            object_id: 29,
            version: 7,
            checksum: 0xff00_ff00_ff00,
            data_len: 5,
        };
        let mut buf = BytesMut::new();
        object.encode(&mut buf);
        buf.extend_from_slice(b"test1");

        let (decoded, data) = ObjectHeader::decode(&buf).unwrap();
        assert_eq!(decoded, object);
        assert_eq!(data, b"test1");
    }

    #[test]
    fn test_object_empty_value() {
        let object = ObjectHeader {
            table_id: 1,
            object_id: 2,
            version: 0,
            checksum: 0,
            data_len: 0,
        };
        let mut buf = BytesMut::new();
        object.encode(&mut buf);
        let (decoded, data) = ObjectHeader::decode(&buf).unwrap();
        assert_eq!(decoded.data_len, 0);
        assert!(data.is_empty());
    }

    #[test]
    fn test_object_value_with_zero_bytes() {
        // Binary payloads containing NUL bytes must survive intact.
        let value = [0u8, 1, 0, 2, 0];
        let object = ObjectHeader {
            table_id: 9,
            object_id: 9,
            version: 1,
            checksum: 42,
            data_len: value.len() as u32,
        };
        let mut buf = BytesMut::new();
        object.encode(&mut buf);
        buf.extend_from_slice(&value);
        let (_, data) = ObjectHeader::decode(&buf).unwrap();
        assert_eq!(data, value);
    }

    #[test]
    fn test_object_data_len_mismatch() {
        let object = ObjectHeader {
            table_id: 1,
            object_id: 2,
            version: 0,
            checksum: 0,
            data_len: 10,
        };
        let mut buf = BytesMut::new();
        object.encode(&mut buf);
        buf.extend_from_slice(b"short");
        assert!(ObjectHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_object_truncated_header() {
        assert!(ObjectHeader::decode(&[0u8; 35]).is_err());
    }

    // ---------------------------------------------------------------
    // Tombstone
    // ---------------------------------------------------------------

    #[test]
    fn test_tombstone_roundtrip() {
        let tomb = Tombstone {
            segment_id: 88,
            table_id: 123,
            object_id: 30,
            version: 3,
        };
        let mut buf = BytesMut::new();
        tomb.encode(&mut buf);
        assert_eq!(buf.len(), Tombstone::SIZE);
        assert_eq!(Tombstone::decode(&buf).unwrap(), tomb);
    }

    #[test]
    fn test_tombstone_wrong_length() {
        assert!(Tombstone::decode(&[0u8; 31]).is_err());
        assert!(Tombstone::decode(&[0u8; 33]).is_err());
    }

    // ---------------------------------------------------------------
    // Footer and checksum
    // ---------------------------------------------------------------

    #[test]
    fn test_footer_roundtrip() {
        let footer = SegmentFooter {
            checksum: 0xdead_beef,
        };
        let mut buf = BytesMut::new();
        footer.encode(&mut buf);
        assert_eq!(SegmentFooter::decode(&buf).unwrap(), footer);
    }

    #[test]
    fn test_checksum_deterministic() {
        let bytes = b"some segment bytes";
        assert_eq!(segment_checksum(bytes), segment_checksum(bytes));
    }

    #[test]
    fn test_checksum_detects_flip() {
        let mut bytes = b"some segment bytes".to_vec();
        let before = segment_checksum(&bytes);
        bytes[3] ^= 0x01;
        assert_ne!(before, segment_checksum(&bytes));
    }

    #[test]
    fn test_checksum_fits_u32() {
        // Wire field is u64, computed value is a zero-extended CRC32.
        assert!(segment_checksum(b"x") <= u64::from(u32::MAX));
    }

    #[test]
    fn test_min_segment_size() {
        assert_eq!(MIN_SEGMENT_SIZE, 5 + 20 + 5 + 8);
    }
}
