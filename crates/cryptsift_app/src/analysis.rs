use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use cryptsift_core::{
    AnalysisConfig, BlockReader, BlockSource, CancellationToken, CoreError, Extent, Partition,
    PartitionAnalyzer, PartitionOutcome, PartitionTable,
};
use cryptsift_io::ImageReader;
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::report::AnalysisRun;

pub fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:50.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

pub fn read_table(image: &Path, config: &AnalysisConfig) -> Result<PartitionTable> {
    let source = ImageReader::open(image)
        .with_context(|| format!("Failed to open image: {}", image.display()))?;
    info!(
        image = %image.display(),
        size = source.size(),
        mmap = source.is_mmap(),
        block_device = source.is_block_device(),
        "image opened"
    );
    let mut reader = BlockReader::new(source, config.sector_size, config.chunk_size)?;
    PartitionTable::parse_with(&mut reader, config.verify_checksums)
        .with_context(|| format!("Failed to read the partition table of {}", image.display()))
}

pub fn list_partitions(image: &Path, config: &AnalysisConfig) -> Result<()> {
    let table = read_table(image, config)?;
    let header = table.header();

    println!("Disk GUID:    {}", header.disk_guid);
    println!("Sector size:  {} bytes", table.sector_size());
    println!(
        "Usable LBAs:  {}..={}",
        header.first_usable_lba, header.last_usable_lba
    );
    println!(
        "Entries:      {} of {} in use\n",
        table.valid_entries().count(),
        header.entry_count
    );

    let partitions = match table.partitions() {
        Ok(partitions) => partitions,
        Err(CoreError::NoValidPartitions) => {
            println!("No valid partitions.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{:>4}  {:<20} {:<24} {:>12} {:>12}  UNIQUE GUID",
        "#", "NAME", "TYPE", "FIRST LBA", "SIZE"
    );
    println!("{}", "-".repeat(116));
    for p in &partitions {
        let kind = p
            .type_guid
            .type_name()
            .map(str::to_string)
            .unwrap_or_else(|| p.type_guid.to_string());
        let first = match p.extent {
            Extent::Sectors { first, .. } => first.to_string(),
            Extent::Bytes { offset, .. } => format!("byte {offset}"),
        };
        println!(
            "{:>4}  {:<20} {:<24} {:>12} {:>12}  {}",
            p.index,
            p.label(),
            kind,
            first,
            format_size(p.byte_len, BINARY),
            p.id
        );
    }
    Ok(())
}

pub fn select(partitions: Vec<Partition>, indices: &[u32]) -> Result<Vec<Partition>> {
    if indices.is_empty() {
        return Ok(partitions);
    }
    let mut selected = Vec::with_capacity(indices.len());
    for &index in indices {
        match partitions.iter().find(|p| p.index == index) {
            Some(p) if !selected.contains(p) => selected.push(p.clone()),
            Some(_) => {}
            None => bail!("No valid partition with index {index}"),
        }
    }
    Ok(selected)
}

pub fn analyze_image(
    image: &Path,
    indices: &[u32],
    config: AnalysisConfig,
    cancel: &CancellationToken,
) -> Result<AnalysisRun> {
    let started = Instant::now();
    let table = read_table(image, &config)?;
    let partitions = select(table.partitions()?, indices)?;
    let total: u64 = partitions.iter().map(|p| p.byte_len).sum();

    info!(
        partitions = partitions.len(),
        bytes = %format_size(total, BINARY),
        workers = config.workers,
        "starting analysis"
    );

    let sector_size = config.sector_size;
    let analyzer = PartitionAnalyzer::new(config)?;
    let pb = progress_bar(total);
    let outcomes = analyzer.analyze_partitions(
        || ImageReader::open(image),
        &partitions,
        cancel,
        &|n| pb.inc(n),
    );
    pb.finish_and_clear();

    Ok(AnalysisRun::new(
        image,
        Some(table.header().disk_guid),
        sector_size,
        interrupted(outcomes)?,
        started.elapsed(),
    ))
}

pub fn analyze_raw(
    file: &Path,
    config: AnalysisConfig,
    cancel: &CancellationToken,
) -> Result<AnalysisRun> {
    let started = Instant::now();
    let source = ImageReader::open(file)
        .with_context(|| format!("Failed to open file: {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let partition = Partition::whole(name, source.size());
    info!(
        file = %file.display(),
        size = source.size(),
        block_device = source.is_block_device(),
        "raw input opened"
    );

    let sector_size = config.sector_size;
    let analyzer = PartitionAnalyzer::new(config)?;
    let mut reader = BlockReader::new(source, sector_size, analyzer.config().chunk_size)?;

    let pb = progress_bar(partition.byte_len);
    let result = analyzer.analyze(&mut reader, &partition, cancel, &|n| pb.inc(n));
    pb.finish_and_clear();

    let outcome = match result {
        Ok(report) => PartitionOutcome::Analyzed(report),
        Err(CoreError::Cancelled) => bail!("Analysis interrupted"),
        Err(e) => PartitionOutcome::Failed {
            partition,
            error: e.to_string(),
        },
    };
    Ok(AnalysisRun::new(
        file,
        None,
        sector_size,
        vec![outcome],
        started.elapsed(),
    ))
}

fn interrupted(
    outcomes: cryptsift_core::Result<Vec<PartitionOutcome>>,
) -> Result<Vec<PartitionOutcome>> {
    match outcomes {
        Ok(outcomes) => Ok(outcomes),
        Err(CoreError::Cancelled) => bail!("Analysis interrupted"),
        Err(e) => Err(e).context("Analysis failed"),
    }
}
