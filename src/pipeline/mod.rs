//! Pipeline orchestrator: ties pagination, enrichment and storage together.
//!
//! ## Run modes
//!
//! `users()`: crawl the institution ratings listing, store the Users sheet.
//!
//! `profiles()`: crawl (or load) handles, enrich each one through the
//!   profile worker pool, store Users/Badges/Ratings/Ranks/Submissions.
//!
//! `contest()`: crawl one contest's rankings, store the ContestRankings sheet.
//!
//! Every pagination run is appended to the DuckDB run log when DuckDB output
//! is enabled. Sink failures are collected, never thrown, so the caller still
//! sees what was extracted.

mod pool;

pub use self::pool::ProfilePool;

use crate::config::{AppConfig, StorageConfig};
use crate::engine::{Cancellation, EngineConfig, ExtractionRun, PaginationEngine};
use crate::error::ScrapeError;
use crate::models::{ProfileDetail, RunSummary};
use crate::scraper::cleaner::parse_rating;
use crate::scraper::{Backoff, ChromeRenderer, ContestRankings, HttpClient, InstitutionUsers, Listing};
use crate::storage::{
    CsvWorkbookSink, Repository, TabularSink, Workbook, contest_table, profile_workbook,
    users_table,
};
use crate::utils;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

/// Where a workbook goes: CSV files, DuckDB tables, or both.
pub struct Outputs {
    csv: Option<CsvWorkbookSink>,
    db: Option<Repository>,
}

impl Outputs {
    pub fn open(storage: &StorageConfig) -> Result<Self> {
        let csv = storage
            .format
            .csv()
            .then(|| CsvWorkbookSink::new(&storage.output_dir));
        let db = if storage.format.duckdb() {
            let repo = Repository::open(&storage.db_path).context("Failed to open DuckDB")?;
            repo.run_migrations()?;
            Some(repo)
        } else {
            None
        };
        Ok(Self { csv, db })
    }

    fn sinks(&self) -> Vec<&dyn TabularSink> {
        let mut sinks: Vec<&dyn TabularSink> = Vec::new();
        if let Some(csv) = &self.csv {
            sinks.push(csv);
        }
        if let Some(db) = &self.db {
            sinks.push(db);
        }
        sinks
    }

    /// Write the workbook to every sink and log the runs. Returns the
    /// failures; a failing sink does not stop the others.
    pub fn persist(&self, workbook: &Workbook, runs: &[RunSummary]) -> Vec<ScrapeError> {
        let mut failures = Vec::new();
        if workbook.tables.is_empty() {
            info!("Nothing to save for {}", workbook.stem);
        } else {
            for sink in self.sinks() {
                if let Err(e) = sink.write(workbook) {
                    error!("{}", e);
                    failures.push(e);
                }
            }
        }

        if let Some(db) = &self.db {
            for run in runs {
                if let Err(e) = db.log_run(run) {
                    warn!("Could not record {} run in the run log: {:#}", run.kind, e);
                }
            }
        }
        failures
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub runs: Vec<RunSummary>,
    pub handles: Vec<String>,
    pub profiles: usize,
    /// Count and mean of numeric ratings; unknown ratings are excluded.
    pub ratings: Option<(usize, f64)>,
    pub sink_errors: Vec<ScrapeError>,
}

pub struct Pipeline {
    config: AppConfig,
    cancel: Cancellation,
}

impl Pipeline {
    pub fn new(config: AppConfig, cancel: Cancellation) -> Self {
        Self { config, cancel }
    }

    /// Per-run cancellation: the shared flag plus the configured deadline.
    /// Each pagination run and each enrichment pass gets its own budget.
    fn run_cancellation(&self) -> Cancellation {
        match self.config.run.deadline_secs {
            Some(secs) => self.cancel.clone().with_deadline(Duration::from_secs(secs)),
            None => self.cancel.clone(),
        }
    }

    async fn launch_renderer(&self) -> Result<ChromeRenderer> {
        let cfg = self.config.scraper.clone();
        tokio::task::spawn_blocking(move || ChromeRenderer::launch(&cfg))
            .await
            .context("Browser launch task failed")?
    }

    async fn paginate<L: Listing>(&self, listing: L, max_pages: u32, backoff: Backoff) -> Result<ExtractionRun> {
        let renderer = self.launch_renderer().await?;
        let engine = EngineConfig {
            max_pages,
            max_retries: self.config.scraper.max_retries,
            confirm_last_page: self.config.run.confirm_last_page,
        };
        Ok(PaginationEngine::new(renderer, listing, backoff, engine, self.run_cancellation())
            .run()
            .await)
    }

    pub async fn crawl_users(&self) -> Result<ExtractionRun> {
        let cfg = &self.config.listing;
        info!("=== Crawling users of {} ===", cfg.institution);
        let listing = InstitutionUsers::new(&self.config.scraper.base_url, &cfg.institution, cfg.page_size)?;
        self.paginate(listing, cfg.max_pages, Backoff::new(&cfg.backoff)).await
    }

    pub async fn crawl_contest(&self) -> Result<ExtractionRun> {
        let cfg = &self.config.contest;
        info!("=== Crawling contest {} for {} ===", cfg.code, cfg.institution);
        let listing = ContestRankings::new(
            &self.config.scraper.base_url,
            &cfg.code,
            &cfg.institution,
            cfg.page_size,
            cfg.expected_problems,
        )?;
        self.paginate(listing, cfg.max_pages, Backoff::new(&cfg.backoff)).await
    }

    pub async fn enrich(&self, handles: &[String]) -> Result<Vec<ProfileDetail>> {
        let pool = ProfilePool::new(
            self.config.profiles.clone(),
            &self.config.scraper.base_url,
            self.config.scraper.max_retries,
            self.run_cancellation(),
        );
        let scraper_cfg = &self.config.scraper;
        pool.run(handles, || HttpClient::new(scraper_cfg)).await
    }

    pub async fn users(&self) -> Result<PipelineStats> {
        let outputs = Outputs::open(&self.config.storage)?;
        let run = self.crawl_users().await?;
        let handles = run.handles();

        let summary = run.summary();
        let mut workbook = Workbook::new("codechef_users");
        if handles.is_empty() {
            warn!("No users found for {}, skipping file creation", run.target);
        } else {
            workbook = workbook.with(users_table(&handles));
        }
        let sink_errors = outputs.persist(&workbook, std::slice::from_ref(&summary));

        Ok(PipelineStats {
            runs: vec![summary],
            handles,
            sink_errors,
            ..Default::default()
        })
    }

    /// `handles` skips the crawl, e.g. when re-enriching a saved Users sheet.
    pub async fn profiles(&self, handles: Option<Vec<String>>, limit: Option<usize>) -> Result<PipelineStats> {
        let outputs = Outputs::open(&self.config.storage)?;
        let mut runs = Vec::new();

        let mut handles = match handles {
            Some(h) => h,
            None => {
                let run = self.crawl_users().await?;
                runs.push(run.summary());
                run.handles()
            }
        };
        if let Some(limit) = limit {
            handles.truncate(limit);
        }

        if handles.is_empty() {
            warn!("No users to enrich, skipping file creation");
            let sink_errors = outputs.persist(&Workbook::new("codechef_profiles"), &runs);
            return Ok(PipelineStats {
                runs,
                sink_errors,
                ..Default::default()
            });
        }

        info!("=== Enriching {} profiles ===", handles.len());
        let details = self.enrich(&handles).await?;

        let ratings: Vec<f64> = details
            .iter()
            .filter(|d| d.rating.is_known())
            .filter_map(|d| parse_rating(&d.rating.value))
            .map(f64::from)
            .collect();
        let rating_summary = utils::mean(&ratings).map(|m| (ratings.len(), m));

        let workbook = profile_workbook("codechef_profiles", &handles, &details);
        let sink_errors = outputs.persist(&workbook, &runs);
        info!("Saved data for {} users", handles.len());

        Ok(PipelineStats {
            runs,
            profiles: details.len(),
            handles,
            ratings: rating_summary,
            sink_errors,
        })
    }

    pub async fn contest(&self) -> Result<PipelineStats> {
        let outputs = Outputs::open(&self.config.storage)?;
        let run = self.crawl_contest().await?;
        let summary = run.summary();
        let stem = format!("codechef_{}_contest_data", run.target);

        let mut workbook = Workbook::new(stem);
        if run.records.is_empty() {
            warn!("No users found for contest {}", run.target);
        } else {
            workbook = workbook.with(contest_table(&run.records(), &run.column_ids()));
        }
        let sink_errors = outputs.persist(&workbook, std::slice::from_ref(&summary));

        Ok(PipelineStats {
            runs: vec![summary],
            handles: run.handles(),
            sink_errors,
            ..Default::default()
        })
    }
}
