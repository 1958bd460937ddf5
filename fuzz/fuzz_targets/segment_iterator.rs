#![no_main]

use libfuzzer_sys::fuzz_target;
use logvault_core::{EntryType, ObjectHeader, SegmentIterator, Tombstone};

fuzz_target!(|data: &[u8]| {
    // Fuzz the strict segment iterator with arbitrary bytes.
    // Tests handling of:
    // - Truncated entry headers and payloads
    // - Entry lengths running past the buffer
    // - Missing headers and footers
    // - Corrupted checksums
    // A crashing master can leave any of these on disk; the iterator must
    // reject them all without panicking.
    let Ok(mut it) = SegmentIterator::new(data) else {
        return;
    };

    // A segment that validated must iterate to completion, and its typed
    // payloads must decode.
    while !it.is_done() {
        match it.entry_type() {
            EntryType::Object => {
                let _ = ObjectHeader::decode(it.payload());
            }
            EntryType::ObjectTombstone => {
                let _ = Tombstone::decode(it.payload());
            }
            EntryType::SegHeader | EntryType::SegFooter => {}
        }
        let _ = it.raw_entry();
        it.advance();
    }
});
