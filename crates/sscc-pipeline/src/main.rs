//! SSCC - code generation and database loading tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use serde::Serialize;
use sscc_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use sscc_common::SerialRange;
use sscc_pipeline::config::Config;
use sscc_pipeline::ingest::{self, SqlCodeStore};
use sscc_pipeline::progress::{create_progress_bar, hidden};
use sscc_pipeline::{generate, GenerateSummary, IngestSummary, Verification};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sscc")]
#[command(author, version, about = "Generate GS1 SSCC-18 codes and load them into a database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one SSCC per serial of the range to the output file
    Generate(GenerateArgs),

    /// Load a code file into the database and verify it
    Ingest(IngestArgs),

    /// Generate, then ingest and verify
    Run {
        #[command(flatten)]
        generate: GenerateArgs,

        #[command(flatten)]
        ingest: IngestArgs,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// First serial reference
    #[arg(long)]
    start: Option<u64>,

    /// Last serial reference (inclusive)
    #[arg(long)]
    end: Option<u64>,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of encoding workers
    #[arg(long)]
    encode_workers: Option<usize>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Code file to load
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Database connection string
    #[arg(long)]
    database_url: Option<String>,

    /// Destination table
    #[arg(long)]
    table: Option<String>,

    /// Number of insertion workers
    #[arg(long)]
    insert_workers: Option<usize>,
}

impl GenerateArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if self.start.is_some() || self.end.is_some() {
            let start = self.start.unwrap_or(config.generate.range.start());
            let end = self.end.unwrap_or(config.generate.range.end());
            config.generate.range = SerialRange::new(start, end).context("Invalid --start/--end")?;
        }
        if let Some(ref output) = self.output {
            config.generate.output_file = output.clone();
            config.ingest.input_file = output.clone();
        }
        if let Some(workers) = self.encode_workers {
            config.generate.workers = workers;
        }
        Ok(())
    }
}

impl IngestArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(ref input) = self.input {
            config.ingest.input_file = input.clone();
        }
        if let Some(ref url) = self.database_url {
            config.database.url = url.clone();
        }
        if let Some(ref table) = self.table {
            config.ingest.table = table.clone();
        }
        if let Some(workers) = self.insert_workers {
            config.ingest.workers = workers;
            config.database.max_connections = (workers as u32).saturating_mul(2);
        }
    }
}

/// Load result plus the consistency check that followed it
#[derive(Debug, Serialize)]
struct IngestReport {
    summary: IngestSummary,
    verification: Verification,
}

impl IngestReport {
    /// Non-zero exit when the check failed or any batch was dead-lettered
    fn into_result(self) -> Result<()> {
        if !self.verification.is_pass() {
            anyhow::bail!("Consistency check failed: {}", self.verification);
        }
        if !self.summary.is_clean() {
            anyhow::bail!(
                "{} batch(es) could not be inserted and were dead-lettered",
                self.summary.batches_dead_lettered
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .output(LogOutput::Console)
        .log_file_prefix("sscc")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = Config::load()?;
    match &cli.command {
        Command::Generate(args) => args.apply(&mut config)?,
        Command::Ingest(args) => args.apply(&mut config),
        Command::Run { generate, ingest } => {
            generate.apply(&mut config)?;
            ingest.apply(&mut config);
        },
    }
    config.validate()?;

    match cli.command {
        Command::Generate(_) => {
            let summary = run_generate(&config, cli.json).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Generated {} codes into {} in {} ms",
                    summary.lines_written,
                    config.generate.output_file.display(),
                    summary.elapsed_ms
                );
            }
        },
        Command::Ingest(_) => {
            let report = run_ingest(&config, cli.json).await?;
            print_report(&report, cli.json)?;
            report.into_result()?;
        },
        Command::Run { .. } => {
            let generated = run_generate(&config, cli.json).await?;
            let report = run_ingest(&config, cli.json).await?;
            if cli.json {
                let combined = serde_json::json!({
                    "generate": generated,
                    "ingest": report.summary,
                    "verification": report.verification,
                });
                println!("{}", serde_json::to_string_pretty(&combined)?);
            } else {
                println!("Generated {} codes", generated.lines_written);
                print_report(&report, false)?;
            }
            report.into_result()?;
        },
    }

    info!("Done");
    Ok(())
}

fn progress_bar(json: bool, total: u64, message: &str) -> ProgressBar {
    if json {
        hidden()
    } else {
        create_progress_bar(total, message)
    }
}

async fn run_generate(config: &Config, json: bool) -> Result<GenerateSummary> {
    let progress = progress_bar(json, config.generate.range.len(), "Generating SSCC codes");
    let summary = generate(&config.generate, progress)
        .await
        .context("Generation failed")?;
    Ok(summary)
}

async fn run_ingest(config: &Config, json: bool) -> Result<IngestReport> {
    let store = Arc::new(
        SqlCodeStore::connect(&config.database, &config.ingest.table)
            .await
            .context("Failed to open database")?,
    );

    let progress = progress_bar(json, 0, "Loading codes");
    let summary = ingest::ingest(&config.ingest, Arc::clone(&store), progress)
        .await
        .context("Ingestion failed")?;

    let verification = ingest::verify(&summary.snapshot, &config.ingest.input_file, &store)
        .await
        .context("Consistency check could not run")?;

    Ok(IngestReport {
        summary,
        verification,
    })
}

fn print_report(report: &IngestReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "Loaded {} rows in {} batches ({} dead-lettered, {} attempts)",
            report.summary.rows_committed,
            report.summary.batches,
            report.summary.batches_dead_lettered,
            report.summary.attempts
        );
        println!("{}", report.verification);
    }
    Ok(())
}
