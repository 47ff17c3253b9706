#![no_main]

use cryptsift_core::{BlockReader, MemorySource, PartitionTable};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for verify in [true, false] {
        let Ok(mut reader) = BlockReader::new(MemorySource::from(data), 512, 4096) else {
            return;
        };
        if let Ok(table) = PartitionTable::parse_with(&mut reader, verify) {
            let _ = table.partitions();
        }
    }
});
