use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cryptsift_core::{
    AnalysisConfig, BlockReader, BlockSource, CancellationToken, Partition, PartitionTable,
};
use cryptsift_io::ImageReader;
use humansize::{BINARY, format_size};
use tracing::{info, warn};

use crate::analysis::progress_bar;

pub fn target_path(dir: &Path, partition: &Partition) -> PathBuf {
    dir.join(format!("{}.bin", partition.id))
}

pub fn run(
    image: &Path,
    out_dir: &Path,
    config: &AnalysisConfig,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let source = ImageReader::open(image)
        .with_context(|| format!("Failed to open image: {}", image.display()))?;
    let mut reader = BlockReader::new(source, config.sector_size, config.chunk_size)?;
    let table = PartitionTable::parse_with(&mut reader, config.verify_checksums)
        .with_context(|| format!("Failed to read the partition table of {}", image.display()))?;
    let partitions = table.partitions()?;

    if dry_run {
        for p in &partitions {
            println!(
                "would write {} ({}) -> {}",
                p.label(),
                format_size(p.byte_len, BINARY),
                target_path(out_dir, p).display()
            );
        }
        return Ok(());
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let pb = progress_bar(partitions.iter().map(|p| p.byte_len).sum());
    for p in &partitions {
        let target = target_path(out_dir, p);
        let written = extract(&mut reader, p, &target, cancel, &|n| pb.inc(n))
            .with_context(|| format!("Failed to extract partition {}", p.label()))?;
        pb.println(format!(
            "{} -> {} ({})",
            p.label(),
            target.display(),
            format_size(written, BINARY)
        ));
    }
    pb.finish_and_clear();
    info!(count = partitions.len(), dir = %out_dir.display(), "partitions extracted");
    Ok(())
}

pub fn extract<S: BlockSource>(
    reader: &mut BlockReader<S>,
    partition: &Partition,
    target: &Path,
    cancel: &CancellationToken,
    progress: &dyn Fn(u64),
) -> Result<u64> {
    let result = copy_partition(reader, partition, target, cancel, progress);
    if result.is_err() {
        match fs::remove_file(target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %target.display(), error = %e, "could not remove partial output"),
        }
    }
    result
}

fn copy_partition<S: BlockSource>(
    reader: &mut BlockReader<S>,
    partition: &Partition,
    target: &Path,
    cancel: &CancellationToken,
    progress: &dyn Fn(u64),
) -> Result<u64> {
    let file = File::create(target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut writer = BufWriter::new(file);

    let blocks = reader.blocks_in_extent(partition.extent)?;

    let mut written = 0u64;
    for block in blocks {
        if cancel.is_cancelled() {
            bail!("Extraction interrupted");
        }
        let block = block?;
        writer.write_all(&block.data)?;
        written += block.data.len() as u64;
        progress(block.data.len() as u64);
    }
    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptsift_core::MemorySource;

    #[test]
    fn test_extracts_exact_range() {
        let data: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let mut reader = BlockReader::new(MemorySource::from(data.clone()), 512, 1024).unwrap();
        let partition = Partition::whole("raw", 3000);
        let dir = tempfile::tempdir().unwrap();
        let target = target_path(dir.path(), &partition);

        let written = extract(&mut reader, &partition, &target, &CancellationToken::new(), &|_| {})
            .unwrap();
        assert_eq!(written, 3000);
        assert_eq!(fs::read(&target).unwrap(), &data[..3000]);
        assert!(target.ends_with("00000000-0000-0000-0000-000000000000.bin"));
    }

    #[test]
    fn test_truncated_source_leaves_no_file() {
        let mut reader = BlockReader::new(MemorySource::from(vec![7u8; 1024]), 512, 512).unwrap();
        let partition = Partition::whole("short", 4096);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("short.bin");

        let result = extract(&mut reader, &partition, &target, &CancellationToken::new(), &|_| {});
        assert!(result.is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_cancelled_extraction_is_removed() {
        let mut reader = BlockReader::new(MemorySource::from(vec![1u8; 4096]), 512, 512).unwrap();
        let partition = Partition::whole("x", 4096);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.bin");
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(extract(&mut reader, &partition, &target, &cancel, &|_| {}).is_err());
        assert!(!target.exists());
    }
}
