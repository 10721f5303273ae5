//! Pagination engine: walks a listing page by page until one of the
//! termination conditions holds.
//!
//! ## States
//!
//! `Fetching(p)` → `Parsing(p)` → `Evaluating(p)` → `Fetching(p + 1)` or
//! `Terminated(reason)`. Cancellation is checked before every fetch and
//! before the pause between pages; a page already rendered is still parsed
//! and merged before the run stops.
//! Whatever has been merged when the run terminates is the result, whatever
//! the reason; a fatal render error still returns the pages read before it.

pub mod records;

pub use self::records::ExtractionRun;

use crate::error::ScrapeError;
use crate::models::{ListingPage, NextControl, Schema, TerminationReason, UserRecord};
use crate::scraper::backoff::{Backoff, retry};
use crate::scraper::parsers::{PageParse, parse_listing_page};
use crate::scraper::{DomSnapshot, Listing, PageRenderer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_pages: u32,
    pub max_retries: u32,
    pub confirm_last_page: bool,
}

/// External stop signal: a flag anyone can raise, plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A page that parsed into rows, waiting to be merged.
#[derive(Debug)]
struct PageRows {
    page: u32,
    records: Vec<UserRecord>,
    discovered: Option<Schema>,
    next: NextControl,
}

#[derive(Debug)]
enum State {
    Fetching(u32),
    Parsing(u32, DomSnapshot),
    Evaluating(PageRows),
    Terminated(TerminationReason),
}

pub struct PaginationEngine<R, L> {
    renderer: R,
    listing: L,
    backoff: Backoff,
    config: EngineConfig,
    cancel: Cancellation,
}

impl<R: PageRenderer, L: Listing> PaginationEngine<R, L> {
    pub fn new(
        renderer: R,
        listing: L,
        backoff: Backoff,
        config: EngineConfig,
        cancel: Cancellation,
    ) -> Self {
        Self {
            renderer,
            listing,
            backoff,
            config,
            cancel,
        }
    }

    /// Consumes the engine; the renderer is released when this returns.
    pub async fn run(mut self) -> ExtractionRun {
        let mut run = ExtractionRun::new(
            self.listing.kind(),
            self.listing.target(),
            self.listing.order(),
        );
        let mut state = State::Fetching(1);

        loop {
            state = match state {
                State::Terminated(reason) => {
                    info!(
                        "{} {:?} finished: {} ({} records over {} pages)",
                        run.kind,
                        run.target,
                        reason,
                        run.records.len(),
                        run.pages.len()
                    );
                    run.terminate(reason);
                    break;
                }
                State::Fetching(_) if self.cancel.is_cancelled() => {
                    warn!("Extraction cancelled");
                    State::Terminated(TerminationReason::Cancelled)
                }
                State::Fetching(page) => self.fetch(page).await,
                State::Parsing(page, snapshot) => {
                    let known = (!run.schema.is_empty()).then_some(&run.schema);
                    self.parse(page, &snapshot, known)
                }
                State::Evaluating(rows) => self.evaluate(rows, &mut run).await,
            };
        }

        run
    }

    async fn fetch(&mut self, page: u32) -> State {
        if page > self.config.max_pages {
            warn!("Reached page limit ({}), stopping", self.config.max_pages);
            return State::Terminated(TerminationReason::MaxPagesReached);
        }

        let url = self.listing.page_url(page);
        info!("Fetching page {}: {}", page, url);

        let what = format!("page {}", page);
        let renderer = &self.renderer;
        match retry(&mut self.backoff, self.config.max_retries, &what, || {
            renderer.render_page(&url)
        })
        .await
        {
            Ok(snapshot) => State::Parsing(page, snapshot),
            Err(e) => {
                error!("{:#}; keeping what was collected so far", e);
                State::Terminated(TerminationReason::FatalRenderError)
            }
        }
    }

    fn parse(&self, page: u32, snapshot: &DomSnapshot, known: Option<&Schema>) -> State {
        debug!("Parsing {} ({} bytes)", snapshot.url, snapshot.html.len());
        match parse_listing_page(&self.listing, &snapshot.html, known) {
            PageParse::NoResults => {
                info!("No results found on page {}", page);
                State::Terminated(TerminationReason::NoResultsMarker)
            }
            PageParse::NoTable { title } => {
                let e = ScrapeError::StructuralParse(format!(
                    "no listing table on page {} (title: {:?})",
                    page, title
                ));
                error!("{}", e);
                State::Terminated(TerminationReason::NoTableFound)
            }
            PageParse::NoDataRows => {
                warn!("No data rows found on page {}", page);
                State::Terminated(TerminationReason::NoDataRows)
            }
            PageParse::Rows {
                records,
                discovered,
                next,
            } => State::Evaluating(PageRows {
                page,
                records,
                discovered,
                next,
            }),
        }
    }

    async fn evaluate(&mut self, rows: PageRows, run: &mut ExtractionRun) -> State {
        let PageRows {
            page,
            records,
            discovered,
            next,
        } = rows;

        if let Some(schema) = discovered
            && run.schema.is_empty()
        {
            info!(
                "Problem columns: {:?} ({} reported by the site)",
                schema.ids(),
                schema.discovered()
            );
            run.schema = schema;
        }

        let count = records.len();
        let new_rows = run.records.merge(records);
        run.pages.push(ListingPage {
            index: page,
            rows: count,
            new_rows,
        });
        info!(
            "Extracted {} users from page {} ({} new). Total so far: {}",
            count,
            page,
            new_rows,
            run.records.len()
        );

        if new_rows == 0 {
            info!("No new users on page {}, stopping", page);
            return State::Terminated(TerminationReason::NoNewRecords);
        }

        let expected = self.listing.expected_page_size();
        if count < expected && page > 1 {
            info!("Partial page {} ({} users < {}), likely last page", page, count, expected);
            if self.config.confirm_last_page {
                self.probe(page + 1, run).await;
            }
            return State::Terminated(TerminationReason::PartialPageConfirmedLast);
        }

        match next {
            NextControl::Enabled if self.cancel.is_cancelled() => State::Fetching(page + 1),
            NextControl::Enabled => {
                let pause = self.backoff.pause();
                debug!("Sleeping {:?} before page {}", pause, page + 1);
                tokio::time::sleep(pause).await;
                State::Fetching(page + 1)
            }
            NextControl::Absent | NextControl::Disabled => {
                info!("Next button disabled or not found - no more pages");
                State::Terminated(TerminationReason::NextControlAbsentOrDisabled)
            }
        }
    }

    /// One unretried look at the page after a short one. Only logs.
    async fn probe(&self, page: u32, run: &ExtractionRun) {
        if page > self.config.max_pages {
            return;
        }
        let url = self.listing.page_url(page);
        let snapshot = match self.renderer.render_page(&url).await {
            Ok(s) => s,
            Err(e) => {
                debug!("Confirmation probe of page {} failed: {}", page, e);
                return;
            }
        };

        let known = (!run.schema.is_empty()).then_some(&run.schema);
        if let PageParse::Rows { records, .. } = parse_listing_page(&self.listing, &snapshot.html, known) {
            let unseen = records.iter().filter(|r| !run.records.contains(&r.handle)).count();
            if unseen > 0 {
                warn!("Page {} still lists {} unseen users after a partial page", page, unseen);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::error::FetchError;
    use crate::models::NO_VALUE;
    use crate::scraper::parsers::fixtures::{contest_listing, next_disabled, next_enabled, user_listing};
    use crate::scraper::{ContestRankings, InstitutionUsers};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use url::Url;

    /// Serves queued responses per page number; an exhausted queue reuses
    /// `fallback` or times out.
    #[derive(Default)]
    struct ScriptedRenderer {
        pages: Mutex<HashMap<u32, VecDeque<Result<String, ()>>>>,
        fallback: Option<String>,
        calls: Arc<AtomicU32>,
        cancel_on_render: Option<Cancellation>,
        released: ReleaseFlag,
    }

    /// Raised when the renderer that owns it is dropped.
    #[derive(Default)]
    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ScriptedRenderer {
        fn page(self, page: u32, html: String) -> Self {
            self.push(page, Ok(html))
        }

        fn failure(self, page: u32) -> Self {
            self.push(page, Err(()))
        }

        fn push(self, page: u32, r: Result<String, ()>) -> Self {
            self.pages.lock().unwrap().entry(page).or_default().push_back(r);
            self
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedRenderer {
        async fn render_page(&self, url: &str) -> Result<DomSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page: u32 = Url::parse(url)
                .unwrap()
                .query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap();

            let next = self.pages.lock().unwrap().get_mut(&page).and_then(|q| q.pop_front());
            let html = match next {
                Some(Ok(html)) => html,
                Some(Err(())) => return Err(FetchError::Render(format!("page {page} crashed"))),
                None => match &self.fallback {
                    Some(html) => html.clone(),
                    None => return Err(FetchError::Timeout(url.to_string())),
                },
            };
            if let Some(cancel) = &self.cancel_on_render {
                cancel.cancel();
            }
            Ok(DomSnapshot { url: url.to_string(), html })
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff::seeded(
            &BackoffConfig {
                base_ms: 1,
                jitter_min_ms: 1,
                jitter_max_ms: 2,
            },
            5,
        )
    }

    fn config() -> EngineConfig {
        EngineConfig {
            max_pages: 20,
            max_retries: 3,
            confirm_last_page: false,
        }
    }

    fn users() -> InstitutionUsers {
        InstitutionUsers::new("https://www.codechef.com", "Test College", 50).unwrap()
    }

    fn handles(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i:03}")).collect()
    }

    fn listing_page(handles: &[String], next: &str) -> String {
        let refs: Vec<&str> = handles.iter().map(String::as_str).collect();
        user_listing(&refs, next)
    }

    async fn run_users(renderer: ScriptedRenderer, config: EngineConfig) -> ExtractionRun {
        PaginationEngine::new(renderer, users(), fast_backoff(), config, Cancellation::new())
            .run()
            .await
    }

    #[tokio::test]
    async fn no_results_marker_stops_after_one_fetch() {
        let renderer = ScriptedRenderer {
            fallback: Some("<html><body><p>No results</p></body></html>".into()),
            ..Default::default()
        };
        let calls = Arc::clone(&renderer.calls);

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::NoResultsMarker));
        assert!(run.records.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_second_page_is_the_last() {
        let renderer = ScriptedRenderer::default()
            .page(1, listing_page(&handles("a", 50), next_enabled()))
            .page(2, listing_page(&handles("b", 30), next_enabled()));
        let calls = Arc::clone(&renderer.calls);

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::PartialPageConfirmedLast));
        assert_eq!(run.records.len(), 80);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_confirmation_probe_does_not_block_termination() {
        let renderer = ScriptedRenderer::default()
            .page(1, listing_page(&handles("a", 50), next_enabled()))
            .page(2, listing_page(&handles("b", 30), next_enabled()));
        let calls = Arc::clone(&renderer.calls);
        let cfg = EngineConfig {
            confirm_last_page: true,
            ..config()
        };

        let run = run_users(renderer, cfg).await;
        assert_eq!(run.reason, Some(TerminationReason::PartialPageConfirmedLast));
        assert_eq!(run.records.len(), 80);
        // page 3 probed once, never retried
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_is_fatal_without_an_extra_attempt() {
        let renderer = ScriptedRenderer::default()
            .failure(1)
            .failure(1)
            .failure(1)
            .page(1, listing_page(&handles("a", 50), next_disabled()));
        let calls = Arc::clone(&renderer.calls);
        let released = Arc::clone(&renderer.released.0);

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::FatalRenderError));
        assert!(run.records.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fatal_error_keeps_earlier_pages() {
        let renderer = ScriptedRenderer::default()
            .page(1, listing_page(&handles("a", 50), next_enabled()));

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::FatalRenderError));
        assert_eq!(run.records.len(), 50);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let renderer = ScriptedRenderer::default()
            .failure(1)
            .page(1, listing_page(&handles("a", 10), next_disabled()));
        let calls = Arc::clone(&renderer.calls);

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::NextControlAbsentOrDisabled));
        assert_eq!(run.records.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_repeated_page_stops_with_no_new_records() {
        let same = listing_page(&handles("a", 50), next_enabled());
        let renderer = ScriptedRenderer::default().page(1, same.clone()).page(2, same);

        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::NoNewRecords));
        assert_eq!(run.records.len(), 50);
        assert_eq!(run.pages[1], ListingPage { index: 2, rows: 50, new_rows: 0 });
    }

    #[tokio::test]
    async fn page_limit_is_checked_before_fetching() {
        let renderer = ScriptedRenderer::default()
            .page(1, listing_page(&handles("a", 50), next_enabled()))
            .page(2, listing_page(&handles("b", 50), next_enabled()))
            .page(3, listing_page(&handles("c", 50), next_enabled()));
        let calls = Arc::clone(&renderer.calls);
        let cfg = EngineConfig {
            max_pages: 2,
            ..config()
        };

        let run = run_users(renderer, cfg).await;
        assert_eq!(run.reason, Some(TerminationReason::MaxPagesReached));
        assert_eq!(run.records.len(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn structural_terminations() {
        let renderer = ScriptedRenderer::default().page(1, "<html><body>down</body></html>".into());
        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::NoTableFound));

        let renderer = ScriptedRenderer::default().page(1, listing_page(&[], next_enabled()));
        let run = run_users(renderer, config()).await;
        assert_eq!(run.reason, Some(TerminationReason::NoDataRows));
    }

    #[tokio::test]
    async fn user_handles_come_out_sorted() {
        let names: Vec<String> = ["mia", "adam", "zoe"].iter().map(|s| s.to_string()).collect();
        let renderer = ScriptedRenderer::default().page(1, listing_page(&names, next_disabled()));
        let run = run_users(renderer, config()).await;
        assert_eq!(run.handles(), ["adam", "mia", "zoe"]);
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_the_first_fetch() {
        let renderer = ScriptedRenderer {
            fallback: Some(listing_page(&handles("a", 50), next_enabled())),
            ..Default::default()
        };
        let calls = Arc::clone(&renderer.calls);
        let cancel = Cancellation::new();
        cancel.cancel();

        let run = PaginationEngine::new(renderer, users(), fast_backoff(), config(), cancel)
            .run()
            .await;
        assert_eq!(run.reason, Some(TerminationReason::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn page_rendered_before_cancellation_is_still_merged() {
        let cancel = Cancellation::new();
        let renderer = ScriptedRenderer {
            fallback: Some(listing_page(&handles("a", 50), next_enabled())),
            cancel_on_render: Some(cancel.clone()),
            ..Default::default()
        };
        let calls = Arc::clone(&renderer.calls);

        let run = PaginationEngine::new(renderer, users(), fast_backoff(), config(), cancel)
            .run()
            .await;
        assert_eq!(run.reason, Some(TerminationReason::Cancelled));
        assert_eq!(run.records.len(), 50);
        assert_eq!(run.pages.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_deadline_cancels() {
        let renderer = ScriptedRenderer::default();
        let cancel = Cancellation::new().with_deadline(Duration::ZERO);
        let run = PaginationEngine::new(renderer, users(), fast_backoff(), config(), cancel)
            .run()
            .await;
        assert_eq!(run.reason, Some(TerminationReason::Cancelled));
    }

    #[tokio::test]
    async fn contest_schema_is_discovered_once_and_rows_keep_rank_order() {
        let page1 = contest_listing(
            &["P1", "P2", "P3", "P4"],
            &[("zed", &["100", "100", "", ""][..]), ("amy", &["100", "", "", ""][..])],
            next_enabled(),
        );
        // Page 2's header drops P4; the run keeps the schema from page 1.
        let page2 = contest_listing(&["P1", "P2", "P3"], &[("bob", &["", "", "50"][..])], next_disabled());
        let renderer = ScriptedRenderer::default().page(1, page1).page(2, page2);
        let listing =
            ContestRankings::new("https://www.codechef.com", "START1", "Test College", 2, 8).unwrap();

        let run = PaginationEngine::new(renderer, listing, fast_backoff(), config(), Cancellation::new())
            .run()
            .await;

        assert_eq!(run.reason, Some(TerminationReason::PartialPageConfirmedLast));
        assert_eq!(run.handles(), ["zed", "amy", "bob"]);
        assert_eq!(run.column_ids(), ["P1", "P2", "P3", "P4", "P5", "P6", "P7", "P8"]);
        assert_eq!(run.schema.discovered(), 4);

        let bob = run.records()[2];
        assert_eq!(bob.scores.len(), 8);
        assert_eq!(bob.scores[2].score, "50");
        assert_eq!(bob.scores[3].score, NO_VALUE);
        assert_eq!(bob.problems_solved, Some(1));
    }
}
