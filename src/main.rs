mod config;
mod convert;
mod dataset;
mod db;
mod diagnostics;
mod download;
mod enrich;
mod error;
mod extract;
mod fax;
mod llm;
mod merge;
mod parser;
mod places;
mod regions;
mod retry;
mod stats;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use config::Config;
use convert::Pdftotext;
use dataset::Table;
use diagnostics::DiagnosticLog;
use parser::layout::LayoutBook;
use regions::Region;

#[derive(Parser)]
#[command(name = "ramq_etl", about = "RAMQ establishments directory pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the regional establishment PDFs
    Download {
        /// Fetch again even if the PDF is already on disk
        #[arg(short, long)]
        force: bool,
    },
    /// Extract establishments from the PDFs (or their .txt renderings)
    Extract {
        /// Directory holding the regional documents (default: <data>/pdfs)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Look up each establishment in Google Places
    Enrich {
        /// Max establishments to look up (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Join the dataset with the places ledger
    Merge,
    /// Search fax numbers for merged establishments
    Fax {
        /// Max rows to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Download missing PDFs, then extract
    Run,
    /// Summarize a pipeline CSV and the ledger
    Stats {
        /// CSV to summarize (default: the most advanced stage output)
        path: Option<PathBuf>,
    },
    /// List large jumps between consecutive establishment codes
    Gaps {
        #[arg(short, long, default_value = "1000")]
        threshold: u64,
        /// CSV to scan (default: the most advanced stage output)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = Config::from_env();

    let result = match cli.command {
        Commands::Download { force } => {
            let stats = download::run_download(
                &Region::all(),
                &cfg.pdf_dir(),
                Duration::from_secs(1),
                !force,
            )
            .await?;
            stats.print();
            Ok(())
        }
        Commands::Extract { input } => {
            let input = input.unwrap_or_else(|| cfg.pdf_dir());
            extract_stage(&cfg, &input)
        }
        Commands::Enrich { limit } => {
            let records = dataset::read_records(&cfg.dataset_csv())?;
            if records.is_empty() {
                println!("Dataset is empty. Run 'extract' first.");
                return Ok(());
            }
            let lookup = places::GooglePlaces::new(cfg.require_places_key()?);
            let conn = db::connect(&cfg.ledger_path())?;
            db::init_schema(&conn)?;
            let opts = enrich::EnrichOptions {
                limit,
                ..Default::default()
            };
            let s = enrich::run_enrich(&conn, &lookup, &records, &opts).await?;
            println!(
                "Done: {} looked up ({} found, {} not found, {} skipped, {} failed).",
                s.total, s.found, s.not_found, s.skipped, s.failed
            );
            Ok(())
        }
        Commands::Merge => {
            let table = Table::read(&cfg.dataset_csv())?;
            let conn = db::connect(&cfg.ledger_path())?;
            db::init_schema(&conn)?;
            let places = db::fetch_places(&conn)?;
            let added_time = chrono::Utc::now().timestamp();
            let (merged, s) = merge::merge_places(&table, &places, added_time)?;
            merged.write(&cfg.merged_csv())?;
            println!(
                "Merged {} rows ({} matched) into {}",
                s.rows,
                s.matched,
                cfg.merged_csv().display()
            );
            Ok(())
        }
        Commands::Fax { limit } => {
            let mut table = Table::read(&cfg.merged_csv())?;
            let model = llm::OpenAi::new(cfg.require_openai_key()?, cfg.openai_model.clone());
            let conn = db::connect(&cfg.ledger_path())?;
            db::init_schema(&conn)?;
            let opts = fax::FaxOptions {
                limit,
                ..Default::default()
            };
            let s = fax::run_fax(&conn, &model, &mut table, &opts).await?;
            table.write(&cfg.final_csv())?;
            println!(
                "Done: {} rows processed, {} searched, {} with fax ({} numbers), {} failed. Wrote {}",
                s.processed,
                s.searched,
                s.with_fax,
                s.numbers,
                s.failed,
                cfg.final_csv().display()
            );
            Ok(())
        }
        Commands::Run => {
            let t_download = Instant::now();
            let stats = download::run_download(
                &Region::all(),
                &cfg.pdf_dir(),
                Duration::from_secs(1),
                true,
            )
            .await?;
            stats.print();
            println!("Download phase in {}", format_duration(t_download.elapsed()));

            let t_extract = Instant::now();
            extract_stage(&cfg, &cfg.pdf_dir())?;
            println!("Extract phase in {}", format_duration(t_extract.elapsed()));
            Ok(())
        }
        Commands::Stats { path } => {
            let path = match path {
                Some(p) => p,
                None => latest_output(&cfg)?,
            };
            println!("{}\n", path.display());
            stats::summarize(&Table::read(&path)?).print();

            let ledger = cfg.ledger_path();
            if ledger.exists() {
                let conn = db::connect(&ledger)?;
                db::init_schema(&conn)?;
                let s = db::get_stats(&conn)?;
                println!("\nLedger:");
                println!("  Found:       {}", s.found);
                println!("  Not found:   {}", s.not_found);
                println!("  Skipped:     {}", s.skipped);
                println!("  Failed:      {}", s.failed);
                println!("  Fax search:  {} ({} with numbers)", s.fax_searched, s.fax_with_numbers);
            }
            Ok(())
        }
        Commands::Gaps { threshold, path } => {
            let path = match path {
                Some(p) => p,
                None => latest_output(&cfg)?,
            };
            let table = Table::read(&path)?;
            let gaps = stats::find_gaps(stats::table_codes(&table), threshold);
            if gaps.is_empty() {
                println!("No gaps larger than {} found.", threshold);
            } else {
                println!("{:>8} | {:>8} | {:>6}", "Before", "After", "Gap");
                println!("{}", "-".repeat(28));
                for g in &gaps {
                    println!("{:>8} | {:>8} | {:>6}", g.before, g.after, g.size());
                }
                println!("\n{} gaps larger than {}", gaps.len(), threshold);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn extract_stage(cfg: &Config, input: &std::path::Path) -> Result<()> {
    let layouts = match &cfg.layouts_path {
        Some(p) => LayoutBook::load(p)?,
        None => LayoutBook::default(),
    };
    let log = DiagnosticLog::new(cfg.diagnostics_log());
    let stats = extract::run_extract(
        input,
        &cfg.extracted_dir(),
        &cfg.dataset_csv(),
        &layouts,
        &Pdftotext::default(),
        &log,
    )?;
    if stats.documents == 0 {
        println!("No documents in {}. Run 'download' first.", input.display());
        return Ok(());
    }
    stats.print();
    if stats.diagnostics > 0 {
        println!("Diagnostics appended to {}", log.path().display());
    }
    Ok(())
}

/// The furthest-along pipeline CSV present on disk.
fn latest_output(cfg: &Config) -> Result<PathBuf> {
    for p in [cfg.final_csv(), cfg.merged_csv(), cfg.dataset_csv()] {
        if p.exists() {
            return Ok(p);
        }
    }
    bail!("No pipeline output under {}. Run 'extract' first.", cfg.data_dir.display())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
