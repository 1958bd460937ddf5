#![no_main]

use libfuzzer_sys::fuzz_target;
use logvault_core::Tablet;
use logvault_storage::{build_recovery_segments, partition_count};

fuzz_target!(|data: &[u8]| {
    // Fuzz the recovery partitioner with arbitrary segment bytes. Any input
    // must either build complete outputs or fail cleanly; partial outputs or
    // panics corrupt a recovery.
    let tablets = vec![
        Tablet::recovering(123, 0, 29, 0),
        Tablet::recovering(124, 20, 100, 0),
        Tablet::recovering(123, 30, 39, 1),
        Tablet::recovering(125, 0, u64::MAX, 1),
    ];

    if let Ok(outputs) = build_recovery_segments(data, &tablets) {
        assert_eq!(outputs.len(), partition_count(&tablets));
    }
});
