//! Per-handle enrichment: the profile page (badges, rating, ranks) and the
//! recent-submissions JSON feed. The two requests are retried independently
//! and a failure empties only its own sections.

use crate::models::{ProfileDetail, Rating, Submission};
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::backoff::{Backoff, retry};
use super::parsers::{ProfileSections, parse_profile, parse_submissions};
use super::HttpFetch;

/// One page of `/recent/user`.
#[derive(Debug, Deserialize)]
struct RecentSubmissionsPage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    max_page: Option<u32>,
}

pub struct ProfileFetcher<H> {
    http: H,
    backoff: Backoff,
    base: Url,
    max_retries: u32,
    submission_pages: u32,
}

impl<H: HttpFetch> ProfileFetcher<H> {
    pub fn new(
        http: H,
        backoff: Backoff,
        base_url: &str,
        max_retries: u32,
        submission_pages: u32,
    ) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid base URL {:?}", base_url))?;
        Ok(Self {
            http,
            backoff,
            base,
            max_retries,
            submission_pages: submission_pages.max(1),
        })
    }

    fn profile_url(&self, handle: &str) -> String {
        let mut url = self.base.clone();
        url.set_path(&format!("/users/{}", handle));
        url.to_string()
    }

    fn submissions_url(&self, handle: &str, page: u32) -> String {
        let mut url = self.base.clone();
        url.set_path("/recent/user");
        url.query_pairs_mut()
            .clear()
            .append_pair("user_handle", handle)
            .append_pair("page", &page.to_string());
        url.to_string()
    }

    /// Never fails: sections that could not be fetched come back empty.
    pub async fn fetch(&mut self, handle: &str) -> ProfileDetail {
        info!("Scraping profile for {}", handle);

        let sections = self.fetch_profile_sections(handle).await;
        let submissions = self.fetch_submissions(handle).await;

        let (badges, rating, ranks) = match sections {
            Some(s) => (s.badges, s.rating, s.ranks),
            None => (Vec::new(), Rating::unknown(), Vec::new()),
        };

        ProfileDetail {
            handle: handle.to_string(),
            badges,
            rating,
            ranks,
            submissions,
        }
    }

    async fn fetch_profile_sections(&mut self, handle: &str) -> Option<ProfileSections> {
        let url = self.profile_url(handle);
        let what = format!("profile {}", handle);
        let http = &self.http;

        match retry(&mut self.backoff, self.max_retries, &what, || http.get_text(&url)).await {
            Ok(html) => Some(parse_profile(&html)),
            Err(e) => {
                warn!("{:#}; skipping profile sections", e);
                None
            }
        }
    }

    async fn fetch_submissions(&mut self, handle: &str) -> Vec<Submission> {
        let mut out = Vec::new();

        for page in 0..self.submission_pages {
            let url = self.submissions_url(handle, page);
            let what = format!("submissions {} page {}", handle, page);
            let http = &self.http;

            let body = match retry(&mut self.backoff, self.max_retries, &what, || http.get_text(&url)).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("{:#}; keeping {} submissions", e, out.len());
                    break;
                }
            };

            let feed: RecentSubmissionsPage = match serde_json::from_str(&body) {
                Ok(feed) => feed,
                Err(e) => {
                    warn!("Failed to parse submissions JSON for {}: {}", handle, e);
                    break;
                }
            };

            let rows = parse_submissions(&feed.content, &self.base);
            debug!("{}: {} submissions on page {}", handle, rows.len(), page);
            let empty = rows.is_empty();
            out.extend(rows);

            let last = feed.max_page.is_none_or(|max| page + 1 >= max);
            if empty || last {
                break;
            }

            let pause = self.backoff.pause();
            tokio::time::sleep(pause).await;
        }

        out
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use crate::error::FetchError;
    use crate::scraper::HttpFetch;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned responses keyed by URL substring; anything unmatched times out.
    #[derive(Default)]
    pub struct StubHttp {
        routes: Vec<(String, Result<String, u16>)>,
        pub calls: Mutex<HashMap<String, u32>>,
    }

    impl StubHttp {
        pub fn route(mut self, needle: &str, body: &str) -> Self {
            self.routes.push((needle.to_string(), Ok(body.to_string())));
            self
        }

        pub fn status(mut self, needle: &str, status: u16) -> Self {
            self.routes.push((needle.to_string(), Err(status)));
            self
        }

        pub fn calls_to(&self, needle: &str) -> u32 {
            let calls = self.calls.lock().unwrap();
            calls
                .iter()
                .filter(|(url, _)| url.contains(needle))
                .map(|(_, n)| *n)
                .sum()
        }
    }

    #[async_trait]
    impl HttpFetch for StubHttp {
        async fn get_text(&self, url: &str) -> Result<String, FetchError> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            match self.routes.iter().find(|(needle, _)| url.contains(needle.as_str())) {
                Some((_, Ok(body))) => Ok(body.clone()),
                Some((_, Err(status))) => Err(FetchError::Status {
                    status: *status,
                    url: url.to_string(),
                }),
                None => Err(FetchError::Timeout(url.to_string())),
            }
        }
    }
}
