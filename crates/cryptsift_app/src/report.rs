use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cryptsift_core::statistics::TestVerdict;
use cryptsift_core::{Classification, Guid, PartitionOutcome, PartitionReport};
use humansize::{BINARY, format_size};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AnalysisRun {
    pub tool: &'static str,
    pub version: &'static str,
    pub image: PathBuf,
    pub disk_guid: Option<Guid>,
    pub sector_size: u32,
    pub generated_at: String,
    pub elapsed_seconds: f64,
    pub partitions: Vec<PartitionOutcome>,
}

impl AnalysisRun {
    pub fn new(
        image: &Path,
        disk_guid: Option<Guid>,
        sector_size: u32,
        partitions: Vec<PartitionOutcome>,
        elapsed: Duration,
    ) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            image: image.to_path_buf(),
            disk_guid,
            sector_size,
            generated_at: Utc::now().to_rfc3339(),
            elapsed_seconds: elapsed.as_secs_f64(),
            partitions,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.partitions.iter().filter(|o| o.report().is_none())
    }

    pub fn bytes_analyzed(&self) -> u64 {
        self.partitions
            .iter()
            .filter_map(PartitionOutcome::report)
            .map(|r| r.bytes_analyzed)
            .sum()
    }
}

pub fn print(run: &AnalysisRun, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(run).context("Failed to serialize report")?;
        println!("{text}");
    } else {
        print!("{}", render_table(run));
    }
    Ok(())
}

pub fn render_table(run: &AnalysisRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Image: {} ({} partition(s), {} analyzed in {:.1}s)\n",
        run.image.display(),
        run.partitions.len(),
        format_size(run.bytes_analyzed(), BINARY),
        run.elapsed_seconds
    );
    let _ = writeln!(
        out,
        "{:>4}  {:<20} {:>12}  {:<14} {:>7}  NOTES",
        "#", "NAME", "SIZE", "VERDICT", "VOTES"
    );
    let _ = writeln!(out, "{}", "-".repeat(80));

    for outcome in &run.partitions {
        let partition = outcome.partition();
        match outcome {
            PartitionOutcome::Analyzed(report) => {
                let _ = writeln!(
                    out,
                    "{:>4}  {:<20} {:>12}  {:<14} {:>7}  {}",
                    partition.index,
                    partition.label(),
                    format_size(partition.byte_len, BINARY),
                    report.classification().to_string(),
                    format!(
                        "{}/{}",
                        report.verdict.tally.encrypted, report.verdict.tally.not_encrypted
                    ),
                    notes(report)
                );
                render_tests(&mut out, report);
            }
            PartitionOutcome::Failed { .. } => {
                let _ = writeln!(
                    out,
                    "{:>4}  {:<20} {:>12}  {:<14} {:>7}  see failures below",
                    partition.index,
                    partition.label(),
                    format_size(partition.byte_len, BINARY),
                    "failed",
                    "-"
                );
            }
        }
    }

    let mut failures = run.failures().peekable();
    if failures.peek().is_some() {
        let _ = writeln!(out, "\nFailed partitions:");
        for outcome in failures {
            if let PartitionOutcome::Failed { partition, error } = outcome {
                let _ = writeln!(out, "  {} ({}): {error}", partition.label(), partition.id);
            }
        }
    }
    out
}

fn notes(report: &PartitionReport) -> String {
    let mut notes = Vec::new();
    if report.verdict.signature_override {
        notes.push("format signature found".to_string());
    }
    if report.classification() == Classification::Inconclusive {
        notes.push("no usable test".to_string());
    }
    if !report.filesystems.is_empty() {
        notes.push(format!("fs: {}", report.filesystems.join(", ")));
    }
    notes.join("; ")
}

fn render_tests(out: &mut String, report: &PartitionReport) {
    for result in &report.verdict.results {
        let verdict = match result.verdict {
            TestVerdict::Vote(true) => "encrypted",
            TestVerdict::Vote(false) => "not encrypted",
            TestVerdict::Override => "override",
            TestVerdict::Abstain => "abstain",
        };
        let _ = writeln!(
            out,
            "        {:<20} {:>14.6}  {verdict}",
            result.kind.name(),
            result.statistic
        );
    }
    for skipped in &report.verdict.skipped {
        let _ = writeln!(
            out,
            "        {:<20} {:>14}  skipped: {}",
            skipped.kind.name(),
            "-",
            skipped.reason
        );
    }
    if let Some(digest) = &report.sha256 {
        let _ = writeln!(out, "        sha256 {digest}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptsift_core::{AnalysisConfig, Partition, PartitionAnalyzer};

    fn sample_run() -> AnalysisRun {
        let analyzer = PartitionAnalyzer::new(AnalysisConfig::default()).unwrap();
        let mut report = analyzer.analyze_bytes(vec![0u8; 4096]).unwrap();
        report.partition.name = "zeros".into();

        let mut broken = Partition::whole("broken", 1 << 20);
        broken.index = 1;
        AnalysisRun::new(
            Path::new("disk.img"),
            None,
            512,
            vec![
                PartitionOutcome::Analyzed(report),
                PartitionOutcome::Failed {
                    partition: broken,
                    error: "Analysis cancelled".into(),
                },
            ],
            Duration::from_millis(1500),
        )
    }

    #[test]
    fn test_table_lists_verdicts_and_failures() {
        let table = render_table(&sample_run());
        assert!(table.starts_with("Image: disk.img (2 partition(s), "));
        assert!(table.contains("analyzed in 1.5s)"));
        assert!(table.contains("zeros"));
        assert!(table.contains("not encrypted"));
        assert!(table.contains("chi_square"));
        assert!(table.contains("skipped:"));
        assert!(table.contains("Failed partitions:"));
        assert!(table.contains("broken"));
    }

    #[test]
    fn test_json_report_shape() {
        let value = serde_json::to_value(sample_run()).unwrap();
        assert_eq!(value["tool"], "cryptsift");
        assert_eq!(value["sector_size"], 512);
        assert!(value["generated_at"].as_str().unwrap().contains('T'));

        let first = &value["partitions"][0];
        assert_eq!(first["status"], "analyzed");
        assert_eq!(first["verdict"]["classification"], "not_encrypted");
        assert_eq!(first["partition"]["name"], "zeros");

        let second = &value["partitions"][1];
        assert_eq!(second["status"], "failed");
        assert_eq!(second["error"], "Analysis cancelled");
    }
}
