#![no_main]

use cryptsift_core::{AnalysisConfig, PartitionAnalyzer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = AnalysisConfig {
        chunk_size: 4096,
        ..Default::default()
    };
    let Ok(analyzer) = PartitionAnalyzer::new(config) else {
        return;
    };
    let _ = analyzer.analyze_bytes(data);
});
