//! cryptsift - flags encrypted partitions in GPT disk images.
//!
//! Each partition is streamed once and scored by a set of randomness tests;
//! a majority vote, vetoed by any structured-format signature, decides.

mod analysis;
mod logging;
mod report;
mod split;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cryptsift_core::{AnalysisConfig, CancellationToken};

#[derive(Parser, Debug)]
#[command(name = "cryptsift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging on stderr.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the partitions of a GPT image.
    Partitions {
        image: PathBuf,

        #[command(flatten)]
        options: ConfigArgs,
    },
    /// Classify the partitions of a GPT image.
    Analyze {
        image: PathBuf,

        /// Only analyze the entry with this table index (repeatable).
        #[arg(short, long = "partition", value_name = "INDEX")]
        partitions: Vec<u32>,

        #[command(flatten)]
        options: ConfigArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Classify a plain file or block device as a single partition.
    AnalyzeRaw {
        file: PathBuf,

        #[command(flatten)]
        options: ConfigArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Extract every valid partition to `<unique-guid>.bin`.
    Split {
        image: PathBuf,

        #[arg(short, long, default_value = "./partitions")]
        output: PathBuf,

        /// Print what would be written without writing it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[command(flatten)]
        options: ConfigArgs,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    sector_size: Option<u32>,

    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Worker threads; 0 uses one per CPU.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Accept tables whose CRC32 fields do not match.
    #[arg(long, default_value_t = false)]
    no_verify_checksums: bool,

    /// Record a SHA-256 digest of every partition.
    #[arg(long, default_value_t = false)]
    hash: bool,
}

impl ConfigArgs {
    fn load(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => AnalysisConfig::default(),
        };

        if let Some(sector_size) = self.sector_size {
            config.sector_size = sector_size;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if config.workers == 0 {
            config.workers = num_cpus::get();
        }
        if self.no_verify_checksums {
            config.verify_checksums = false;
        }
        if self.hash {
            config.hash_partitions = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Print a JSON report on stdout instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || token.cancel()).context("Failed to set Ctrl+C handler")?;

    match cli.command {
        Command::Partitions { image, options } => {
            let config = options.load()?;
            analysis::list_partitions(&image, &config)
        }
        Command::Analyze {
            image,
            partitions,
            options,
            output,
        } => {
            let config = options.load()?;
            let run = analysis::analyze_image(&image, &partitions, config, &cancel)?;
            report::print(&run, output.json)
        }
        Command::AnalyzeRaw {
            file,
            options,
            output,
        } => {
            let config = options.load()?;
            let run = analysis::analyze_raw(&file, config, &cancel)?;
            report::print(&run, output.json)
        }
        Command::Split {
            image,
            output,
            dry_run,
            options,
        } => {
            let config = options.load()?;
            split::run(&image, &output, &config, dry_run, &cancel)
        }
    }
}
