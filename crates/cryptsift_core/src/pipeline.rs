use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::battery::FrequencyBattery;
use crate::blocks::BlockReader;
use crate::config::AnalysisConfig;
use crate::error::{CoreError, Result};
use crate::gpt::Partition;
use crate::histogram::ByteHistogram;
use crate::probe::{PROBE_LEN, SuperblockProbe};
use crate::sampling::SampleCollector;
use crate::signatures::SignatureSet;
use crate::source::MemorySource;
use crate::statistics::{Evidence, TestKind, TestSuite, build_compressors};
use crate::traits::{BlockSource, Compressor, FilesystemProbe, RandomnessBattery};
use crate::verdict::{Classification, ClassificationVerdict, VerdictAggregator};

/// Cooperative cancellation flag, checked at every chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub partition: Partition,
    pub bytes_analyzed: u64,
    pub verdict: ClassificationVerdict,
    pub filesystems: Vec<String>,
    pub sha256: Option<String>,
}

impl PartitionReport {
    #[inline]
    pub fn classification(&self) -> Classification {
        self.verdict.classification
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PartitionOutcome {
    Analyzed(PartitionReport),
    Failed { partition: Partition, error: String },
}

impl PartitionOutcome {
    pub fn partition(&self) -> &Partition {
        match self {
            PartitionOutcome::Analyzed(report) => &report.partition,
            PartitionOutcome::Failed { partition, .. } => partition,
        }
    }

    pub fn report(&self) -> Option<&PartitionReport> {
        match self {
            PartitionOutcome::Analyzed(report) => Some(report),
            PartitionOutcome::Failed { .. } => None,
        }
    }
}

pub struct PartitionAnalyzer {
    config: AnalysisConfig,
    signatures: SignatureSet,
    compressors: Vec<Box<dyn Compressor>>,
    battery: Box<dyn RandomnessBattery>,
    probe: Box<dyn FilesystemProbe>,
    aggregator: VerdictAggregator,
}

impl PartitionAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let signatures = SignatureSet::from_config(config.signatures.as_deref())?;
        let compressors = build_compressors(&config.compressors);
        Ok(Self {
            config,
            signatures,
            compressors,
            battery: Box::new(FrequencyBattery),
            probe: Box::new(SuperblockProbe),
            aggregator: VerdictAggregator,
        })
    }

    pub fn with_battery(mut self, battery: Box<dyn RandomnessBattery>) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn FilesystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_compressors(mut self, compressors: Vec<Box<dyn Compressor>>) -> Self {
        self.compressors = compressors;
        self
    }

    #[inline]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze_bytes(&self, data: impl Into<MemorySource>) -> Result<PartitionReport> {
        let source: MemorySource = data.into();
        let partition = Partition::whole("buffer", source.size());
        let mut reader = BlockReader::new(source, self.config.sector_size, self.config.chunk_size)?;
        self.analyze(&mut reader, &partition, &CancellationToken::new(), &|_| {})
    }

    pub fn analyze<S: BlockSource>(
        &self,
        reader: &mut BlockReader<S>,
        partition: &Partition,
        cancel: &CancellationToken,
        progress: &dyn Fn(u64),
    ) -> Result<PartitionReport> {
        let started = Instant::now();
        info!(partition = %partition.label(), offset = partition.byte_offset, len = partition.byte_len, "analyzing");

        let config = &self.config;
        let scan_signatures = config.is_enabled(TestKind::Signatures);
        let probe_len = if config.probe_filesystems {
            PROBE_LEN.min(usize::try_from(partition.byte_len).unwrap_or(PROBE_LEN))
        } else {
            0
        };

        let mut histogram = ByteHistogram::new();
        let mut sampler = SampleCollector::new(partition.byte_len, &config.sampling);
        let mut scanner = self.signatures.scanner(config.max_recorded_offsets);
        let mut hasher = config.hash_partitions.then(Sha256::new);
        let mut head = Vec::with_capacity(probe_len);
        let mut bytes_analyzed = 0u64;

        let mut blocks = reader.blocks_in_extent(partition.extent)?;

        loop {
            if cancel.is_cancelled() {
                warn!(partition = %partition.label(), bytes_analyzed, "cancelled");
                return Err(CoreError::Cancelled);
            }
            let Some(block) = blocks.next() else {
                break;
            };
            let block = block?;
            let data = block.data.as_slice();
            let relative = block.offset - partition.byte_offset;

            histogram.feed(data);
            sampler.feed(relative, data);
            if scan_signatures {
                scanner.feed(data);
            }
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(data);
            }
            if head.len() < probe_len {
                let take = (probe_len - head.len()).min(data.len());
                head.extend_from_slice(&data[..take]);
            }

            bytes_analyzed += data.len() as u64;
            progress(data.len() as u64);
        }

        let sample = sampler.finish();
        let signatures = scanner.finish();
        let evidence = Evidence {
            histogram: &histogram,
            sample: &sample,
            signatures: &signatures,
        };

        let suite = TestSuite::new(config, &self.compressors, self.battery.as_ref());
        let (results, skipped) = suite.run(&evidence);
        let verdict = self.aggregator.aggregate(results, skipped);

        let filesystems = if head.is_empty() {
            Vec::new()
        } else {
            self.probe.probe(&head)
        };

        info!(
            partition = %partition.label(),
            classification = %verdict.classification,
            encrypted_votes = verdict.tally.encrypted,
            not_encrypted_votes = verdict.tally.not_encrypted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "partition classified"
        );

        Ok(PartitionReport {
            partition: partition.clone(),
            bytes_analyzed,
            verdict,
            filesystems,
            sha256: hasher.map(|h| format!("{:x}", h.finalize())),
        })
    }

    pub fn analyze_partitions<S, F>(
        &self,
        open: F,
        partitions: &[Partition],
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<Vec<PartitionOutcome>>
    where
        S: BlockSource,
        F: Fn() -> Result<S> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("cannot build worker pool: {e}")))?;

        let results: Vec<Result<PartitionReport>> = pool.install(|| {
            partitions
                .par_iter()
                .map(|partition| {
                    let source = open()?;
                    let mut reader =
                        BlockReader::new(source, self.config.sector_size, self.config.chunk_size)?;
                    self.analyze(&mut reader, partition, cancel, progress)
                })
                .collect()
        });

        let mut outcomes = Vec::with_capacity(results.len());
        for (partition, result) in partitions.iter().zip(results) {
            match result {
                Ok(report) => outcomes.push(PartitionOutcome::Analyzed(report)),
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    warn!(partition = %partition.label(), error = %e, "partition analysis failed");
                    outcomes.push(PartitionOutcome::Failed {
                        partition: partition.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(outcomes)
    }
}
