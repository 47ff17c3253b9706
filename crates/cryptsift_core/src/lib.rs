pub mod battery;
pub mod blocks;
pub mod config;
mod error;
pub mod gpt;
pub mod histogram;
pub mod pipeline;
pub mod probe;
pub mod sampling;
pub mod signatures;
mod source;
pub mod statistics;
mod traits;
pub mod verdict;

pub use blocks::{Block, BlockReader, Extent};
pub use config::AnalysisConfig;
pub use error::{CoreError, Result};
pub use gpt::{Guid, Partition, PartitionEntry, PartitionTable, PartitionTableHeader};
pub use histogram::ByteHistogram;
pub use pipeline::{CancellationToken, PartitionAnalyzer, PartitionOutcome, PartitionReport};
pub use source::MemorySource;
pub use traits::{BlockSource, Compressor, FilesystemProbe, RandomnessBattery};
pub use verdict::{Classification, ClassificationVerdict, VerdictAggregator};
