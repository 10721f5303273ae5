mod config;
mod engine;
mod error;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::engine::Cancellation;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "rankscrape", about = "CodeChef institution ratings and contest rankings scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Institution name as shown on CodeChef (overrides config)
    #[arg(long, global = true, env = "RANKSCRAPE_INSTITUTION")]
    institution: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the institution's rated users and print their handles
    Users,

    /// Enrich every handle with badges, rating, ranks and recent submissions
    Profiles {
        /// Re-enrich handles from a saved Users.csv instead of crawling
        #[arg(long)]
        from: Option<PathBuf>,

        /// Only enrich the first N handles
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Crawl one contest's rankings filtered to the institution
    Contest {
        /// Contest code, e.g. START202D (overrides config)
        #[arg(long)]
        code: Option<String>,
    },

    /// Show the extraction-run log
    Runs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn print_summary(stats: &PipelineStats) {
    println!("─────────────────────────────────");
    for run in &stats.runs {
        println!(
            "  {} {:<24}: {} records, {} pages ({})",
            run.kind,
            run.target,
            utils::fmt_number(run.records as i64),
            run.pages,
            run.reason
        );
    }
    if stats.profiles > 0 {
        println!("  Profiles : {}", utils::fmt_number(stats.profiles as i64));
    }
    if let Some((count, mean)) = stats.ratings {
        println!("  Ratings  : {} rated, mean {:.1}", count, mean);
    }
    println!("─────────────────────────────────");
}

/// Print the summary, then fail if any sink could not be written.
fn finish(stats: &PipelineStats) -> Result<()> {
    print_summary(stats);
    if !stats.sink_errors.is_empty() {
        bail!(
            "{} of the outputs could not be written: {}",
            stats.sink_errors.len(),
            stats
                .sink_errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "rankscrape=info,warn",
        1 => "rankscrape=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(institution) = cli.institution {
        config.listing.institution = institution.clone();
        config.contest.institution = institution;
    }

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Users => {
            let _t = utils::Timer::start("User listing crawl");
            let stats = Pipeline::new(config, cancel).users().await?;
            if stats.handles.is_empty() {
                println!("No users found.");
            } else {
                println!("✅ Found {} users:", stats.handles.len());
                for h in &stats.handles {
                    println!("  {}", h);
                }
            }
            finish(&stats)?;
        }

        Command::Profiles { from, limit } => {
            let _t = utils::Timer::start("Profile enrichment");
            let handles = match from {
                Some(path) => Some(loader::load_handles(&path)?),
                None => None,
            };
            let stats = Pipeline::new(config, cancel).profiles(handles, limit).await?;
            info!("Done: {} handles, {} profiles", stats.handles.len(), stats.profiles);
            finish(&stats)?;
        }

        Command::Contest { code } => {
            if let Some(code) = code {
                config.contest.code = code;
            }
            let _t = utils::Timer::start(format!("Contest {} crawl", config.contest.code));
            let stats = Pipeline::new(config, cancel).contest().await?;
            println!("✅ Found {} users in contest", stats.handles.len());
            finish(&stats)?;
        }

        Command::Runs { limit } => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let runs = repo.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded. Enable DuckDB output with storage.format = \"duckdb\".");
            } else {
                for r in &runs {
                    println!(
                        "  #{:<4} {} {:<8} {:<30} {:>6} records {:>3} pages  {}",
                        r.id,
                        r.started_at.format("%Y-%m-%d %H:%M"),
                        r.kind,
                        r.target,
                        r.records,
                        r.pages,
                        r.reason
                    );
                }
            }
        }
    }

    Ok(())
}
