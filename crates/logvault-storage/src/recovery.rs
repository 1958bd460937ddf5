//! Recovery Partitioning
//!
//! Splits a stored segment into per-partition recovery sub-segments. Each
//! object or tombstone entry is routed to the partition whose tablet rule
//! covers its `(table_id, object_id)`; the recovering masters then replay
//! exactly the entries for the tablets they are taking over.
//!
//! ## Placement rules
//!
//! - Only tablets in the `Recovering` state participate.
//! - First match wins, in tablet-list insertion order; rules may overlap on
//!   table id but the coordinator guarantees they do not overlap on
//!   `(table_id, object_id)` within a partition.
//! - An entry no rule covers is dropped with a diagnostic: it belonged to a
//!   tablet that was deleted or reassigned to another log since the segment
//!   was written. Dropping it is correct; failing the build would lose the
//!   rest of the segment.
//! - Entries are copied verbatim, `{type, length}` header included, in
//!   segment order, so a partition's sub-segment preserves the source order.
//!
//! A malformed segment (torn write, missing footer, checksum mismatch) aborts
//! the build with no partial outputs; the caller records the failure and
//! every recovery read for the segment surfaces it.
//!
//! Lookup is a linear scan. Recovery tablet maps are small (one rule per
//! tablet being recovered); an interval tree keyed by table would be a
//! drop-in replacement if that ever changes.

use logvault_core::{
    EntryType, ObjectHeader, Result, SegmentIterator, Tablet, TabletState, Tombstone,
};

/// Partition for `(table_id, object_id)`, or `None` if no recovering tablet
/// covers it. First match in insertion order wins.
pub fn which_partition(table_id: u64, object_id: u64, tablets: &[Tablet]) -> Option<u64> {
    tablets
        .iter()
        .filter(|tablet| tablet.state == TabletState::Recovering)
        .find(|tablet| tablet.covers(table_id, object_id))
        .map(|tablet| tablet.partition_id)
}

/// Number of output partitions for a tablet map: one past the highest
/// partition id among recovering tablets, zero for an empty map.
pub fn partition_count(tablets: &[Tablet]) -> usize {
    tablets
        .iter()
        .filter(|tablet| tablet.state == TabletState::Recovering)
        .map(|tablet| tablet.partition_id)
        .max()
        .map(|max| max as usize + 1)
        .unwrap_or(0)
}

/// Split a validated segment image into per-partition entry streams.
pub fn build_recovery_segments(data: &[u8], tablets: &[Tablet]) -> Result<Vec<Vec<u8>>> {
    let mut iterator = SegmentIterator::new(data)?;
    let mut outputs = vec![Vec::new(); partition_count(tablets)];

    while !iterator.is_done() {
        let placement = match iterator.entry_type() {
            EntryType::SegHeader | EntryType::SegFooter => None,
            EntryType::Object => {
                let (object, _data) = ObjectHeader::decode(iterator.payload())?;
                Some((object.table_id, object.object_id))
            }
            EntryType::ObjectTombstone => {
                let tombstone = Tombstone::decode(iterator.payload())?;
                Some((tombstone.table_id, tombstone.object_id))
            }
        };

        if let Some((table_id, object_id)) = placement {
            match which_partition(table_id, object_id, tablets) {
                Some(partition_id) => {
                    outputs[partition_id as usize].extend_from_slice(iterator.raw_entry());
                }
                None => {
                    tracing::debug!(
                        table_id,
                        object_id,
                        "no recovering tablet covers entry; dropped (deleted tablet or reassigned log)"
                    );
                }
            }
        }
        iterator.advance();
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvault_core::{RecoverySegmentIterator, SegmentBuilder};

    /// The six-rule map used throughout the recovery tests: partition 0 owns
    /// table 123 ids 0-29 and table 124 ids 20-100; partition 1 owns table
    /// 123 ids 30-39 and all of table 125.
    fn tablet_list() -> Vec<Tablet> {
        vec![
            Tablet::recovering(123, 0, 9, 0),
            Tablet::recovering(123, 10, 19, 0),
            Tablet::recovering(123, 20, 29, 0),
            Tablet::recovering(124, 20, 100, 0),
            Tablet::recovering(123, 30, 39, 1),
            Tablet::recovering(125, 0, u64::MAX, 1),
        ]
    }

    fn collect_ids(data: &[u8]) -> Vec<(EntryType, u64, u64)> {
        let mut it = RecoverySegmentIterator::new(data).unwrap();
        let mut entries = Vec::new();
        while !it.is_done() {
            match it.entry_type() {
                EntryType::Object => {
                    let (object, _) = ObjectHeader::decode(it.payload()).unwrap();
                    entries.push((EntryType::Object, object.table_id, object.object_id));
                }
                EntryType::ObjectTombstone => {
                    let tombstone = Tombstone::decode(it.payload()).unwrap();
                    entries.push((
                        EntryType::ObjectTombstone,
                        tombstone.table_id,
                        tombstone.object_id,
                    ));
                }
                other => panic!("unexpected entry type {:?}", other),
            }
            it.advance();
        }
        entries
    }

    // ---------------------------------------------------------------
    // which_partition
    // ---------------------------------------------------------------

    #[test]
    fn test_which_partition_basic() {
        let tablets = tablet_list();
        assert_eq!(which_partition(123, 10, &tablets), Some(0));
        assert_eq!(which_partition(123, 30, &tablets), Some(1));
        assert_eq!(which_partition(123, 40, &tablets), None);
    }

    #[test]
    fn test_which_partition_boundaries() {
        let tablets = tablet_list();
        assert_eq!(which_partition(123, 29, &tablets), Some(0));
        assert_eq!(which_partition(124, 20, &tablets), Some(0));
        assert_eq!(which_partition(124, 19, &tablets), None);
        assert_eq!(which_partition(125, u64::MAX, &tablets), Some(1));
    }

    #[test]
    fn test_which_partition_ignores_normal_tablets() {
        let mut tablets = tablet_list();
        tablets[0].state = TabletState::Normal;
        // Rule 0 covered (123, 5); with it inert nothing does.
        assert_eq!(which_partition(123, 5, &tablets), None);
    }

    #[test]
    fn test_which_partition_first_match_wins() {
        // Overlapping rules: insertion order decides.
        let tablets = vec![
            Tablet::recovering(7, 0, 100, 3),
            Tablet::recovering(7, 50, 200, 5),
        ];
        assert_eq!(which_partition(7, 75, &tablets), Some(3));
        assert_eq!(which_partition(7, 150, &tablets), Some(5));
    }

    #[test]
    fn test_partition_count() {
        assert_eq!(partition_count(&tablet_list()), 2);
        assert_eq!(partition_count(&[]), 0);
        assert_eq!(partition_count(&[Tablet::recovering(1, 0, 1, 7)]), 8);
        let normal_only = vec![Tablet {
            state: TabletState::Normal,
            ..Tablet::recovering(1, 0, 1, 7)
        }];
        assert_eq!(partition_count(&normal_only), 0);
    }

    // ---------------------------------------------------------------
    // build_recovery_segments
    // ---------------------------------------------------------------

    #[test]
    fn test_partitioned_recovery() {
        // Objects and tombstones across both partitions, with (123, 40)-style
        // strays excluded by construction.
        let mut builder = SegmentBuilder::new(99, 88, 4096).unwrap();
        builder.append_object(123, 29, 0, b"test1").unwrap();
        builder.append_object(123, 30, 0, b"test2").unwrap();
        builder.append_object(124, 20, 0, b"test3").unwrap();
        builder.append_object(125, 20, 0, b"test4").unwrap();
        for (table_id, object_id) in [(123, 29), (123, 30), (124, 20), (125, 20)] {
            builder
                .append_tombstone(Tombstone {
                    segment_id: 88,
                    table_id,
                    object_id,
                    version: 0,
                })
                .unwrap();
        }
        let image = builder.finish();

        let outputs = build_recovery_segments(&image, &tablet_list()).unwrap();
        assert_eq!(outputs.len(), 2);

        assert_eq!(
            collect_ids(&outputs[0]),
            vec![
                (EntryType::Object, 123, 29),
                (EntryType::Object, 124, 20),
                (EntryType::ObjectTombstone, 123, 29),
                (EntryType::ObjectTombstone, 124, 20),
            ]
        );
        assert_eq!(
            collect_ids(&outputs[1]),
            vec![
                (EntryType::Object, 123, 30),
                (EntryType::Object, 125, 20),
                (EntryType::ObjectTombstone, 123, 30),
                (EntryType::ObjectTombstone, 125, 20),
            ]
        );
    }

    #[test]
    fn test_unmatched_entries_dropped() {
        let mut builder = SegmentBuilder::new(99, 88, 2048).unwrap();
        builder.append_object(123, 40, 0, b"stray").unwrap();
        builder.append_object(999, 1, 0, b"stray2").unwrap();
        let image = builder.finish();

        let outputs = build_recovery_segments(&image, &tablet_list()).unwrap();
        assert!(outputs[0].is_empty());
        assert!(outputs[1].is_empty());
    }

    #[test]
    fn test_source_order_preserved() {
        let mut builder = SegmentBuilder::new(99, 88, 4096).unwrap();
        builder.append_object(123, 3, 1, b"e1").unwrap();
        builder.append_object(123, 1, 2, b"e2").unwrap();
        builder.append_object(123, 2, 3, b"e3").unwrap();
        let image = builder.finish();

        let outputs = build_recovery_segments(&image, &tablet_list()).unwrap();
        assert_eq!(
            collect_ids(&outputs[0]),
            vec![
                (EntryType::Object, 123, 3),
                (EntryType::Object, 123, 1),
                (EntryType::Object, 123, 2),
            ]
        );
    }

    #[test]
    fn test_entries_copied_verbatim() {
        let mut builder = SegmentBuilder::new(99, 88, 2048).unwrap();
        builder.append_object(123, 5, 42, b"payload").unwrap();
        let image = builder.finish();

        let outputs = build_recovery_segments(&image, &tablet_list()).unwrap();
        let mut it = RecoverySegmentIterator::new(&outputs[0]).unwrap();
        let (object, data) = ObjectHeader::decode(it.payload()).unwrap();
        assert_eq!(object.version, 42);
        assert_eq!(data, b"payload");
        it.advance();
        assert!(it.is_done());
    }

    #[test]
    fn test_empty_tablet_map_yields_no_partitions() {
        let image = SegmentBuilder::new(99, 88, 1024).unwrap().finish();
        let outputs = build_recovery_segments(&image, &[]).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_header_and_footer_skipped() {
        let image = SegmentBuilder::new(99, 88, 1024).unwrap().finish();
        let outputs = build_recovery_segments(&image, &tablet_list()).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_malformed_segment_aborts() {
        assert!(build_recovery_segments(b"garbage", &tablet_list()).is_err());
        let zeroes = vec![0u8; 1024];
        assert!(build_recovery_segments(&zeroes, &tablet_list()).is_err());
    }

    #[test]
    fn test_build_deterministic() {
        let mut builder = SegmentBuilder::new(99, 88, 4096).unwrap();
        for i in 0..20 {
            builder.append_object(123, i, 0, &[i as u8; 8]).unwrap();
        }
        let image = builder.finish();
        let first = build_recovery_segments(&image, &tablet_list()).unwrap();
        let second = build_recovery_segments(&image, &tablet_list()).unwrap();
        assert_eq!(first, second);
    }
}
