mod analysis;
mod backup;
mod config;
mod error;
mod inbox;
mod parser;
mod pipeline;
mod reconcile;
mod record;
mod source;
mod store;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};

use crate::analysis::HourlySummary;
use crate::config::Settings;
use crate::inbox::Inbox;
use crate::pipeline::{CleanupOutcome, Pipeline};

#[derive(Parser)]
#[command(name = "gym_crowd", about = "Gym occupancy notes → deduplicated CSV dataset")]
struct Cli {
    /// Settings file (default: ./gym_crowd.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract, merge, then remove consumed reports from the source
    Run {
        /// Merge only; leave the source untouched
        #[arg(long)]
        no_cleanup: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge the structured inbox CSV and archive it
    Inbox {
        /// Inbox file (default: from settings)
        path: Option<PathBuf>,
    },
    /// Per-hour occupancy summary of the dataset
    Analyze {
        #[arg(long)]
        json: bool,
    },
    /// Check source, dataset and backup locations
    Diagnose,
    /// Show what a run would extract, without writing anything
    Preview,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let pipeline = Pipeline::from_settings(&settings).context("building extractor")?;
    let source = source::build_source(&settings.source);
    let now = Local::now().naive_local();

    let result = match cli.command {
        Commands::Run { no_cleanup, json } => {
            let report = pipeline
                .run(source.as_ref(), !no_cleanup, now)
                .context("run failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Extracted {} records: {} new, {} total.",
                    report.extracted, report.added, report.total
                );
                match &report.cleanup {
                    CleanupOutcome::NotRequested => {}
                    CleanupOutcome::NothingToRemove => println!("Source: nothing to remove."),
                    CleanupOutcome::Applied { spans, backup } => println!(
                        "Source: removed {} reports (backup {}).",
                        spans,
                        backup.display()
                    ),
                    CleanupOutcome::Skipped { reason } => println!("Source: left untouched ({reason})."),
                    CleanupOutcome::Failed { reason, backup } => println!(
                        "Source: update failed ({reason}); backup at {}.",
                        backup.display()
                    ),
                }
                if let Some(summary) = &report.analysis {
                    print_summary(summary);
                }
            }
            Ok(())
        }
        Commands::Inbox { path } => {
            let inbox = Inbox::new(
                path.unwrap_or_else(|| settings.inbox.path.clone()),
                settings.inbox.max_age_days,
            );
            let report = pipeline.ingest_inbox(&inbox, now).context("inbox ingestion failed")?;
            if !report.found {
                println!("No inbox at {}.", inbox.path().display());
                return Ok(());
            }
            println!(
                "Read {} inbox rows: {} new, {} total.",
                report.read, report.added, report.total
            );
            if let Some(archived) = &report.archived {
                println!("Inbox archived to {}.", archived.display());
            }
            Ok(())
        }
        Commands::Analyze { json } => {
            let summary = pipeline.analyze().context("reading dataset")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        Commands::Diagnose => {
            let d = pipeline.diagnose(source.as_ref());
            let ok = |b: bool| if b { "ok" } else { "NOT WRITABLE" };
            match &d.source_status {
                Ok(chars) => println!("Source:   {} ({} chars)", d.source, chars),
                Err(e) => println!("Source:   {} FAILED: {}", d.source, e),
            }
            match &d.dataset_rows {
                Ok(Some(rows)) => println!("Dataset:  {} ({} rows)", d.dataset.display(), rows),
                Ok(None) => println!("Dataset:  {} (not created yet)", d.dataset.display()),
                Err(e) => println!("Dataset:  {} FAILED: {}", d.dataset.display(), e),
            }
            println!("  dir:    {}", ok(d.dataset_dir_writable));
            println!("Backups:  {} {}", d.backup_dir.display(), ok(d.backup_dir_writable));
            Ok(())
        }
        Commands::Preview => {
            let preview = pipeline.preview(source.as_ref(), now).context("preview failed")?;
            if preview.records.is_empty() {
                println!("No reports found.");
                return Ok(());
            }
            println!(
                "{:>3} | {:<19} | {:>5} | {:>4} | {:<28}",
                "#", "Datetime", "Count", "Code", "Raw"
            );
            println!("{}", "-".repeat(70));
            for (i, r) in preview.records.iter().enumerate() {
                println!(
                    "{:>3} | {:<19} | {:>5} | {:>4} | {:<28}",
                    i + 1,
                    r.timestamp().format(record::DATETIME_FORMAT),
                    r.count(),
                    r.status().code,
                    truncate(r.raw_text(), 28)
                );
            }
            println!("\n{} records, {} spans would be removed by cleanup", preview.records.len(), preview.spans.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_summary(s: &HourlySummary) {
    if s.total_records == 0 {
        println!("No data to analyze.");
        return;
    }
    println!("\n{} records\n", s.total_records);
    println!("{:>5} | {:>7} | {:>6} | {:>4} | {:>4}", "Hour", "Samples", "Mean", "Min", "Max");
    println!("{}", "-".repeat(38));
    for h in &s.hours {
        println!(
            "{:>2}:00 | {:>7} | {:>6.1} | {:>4} | {:>4}",
            h.hour, h.samples, h.mean, h.min, h.max
        );
    }
    if !s.quiet.is_empty() {
        let hours: Vec<String> = s.quiet.iter().map(|h| format!("{}:00", h.hour)).collect();
        println!("\nQuiet: {}", hours.join(", "));
    }
    if !s.busy.is_empty() {
        let hours: Vec<String> = s.busy.iter().map(|h| format!("{}:00", h.hour)).collect();
        println!("Busy:  {}", hours.join(", "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
