//! Profile enrichment worker pool.
//!
//! Each worker owns its HTTP session and its own backoff; they share the
//! handle queue and one rate limiter, so requests across all workers stay
//! at least `request_interval` apart.

use crate::config::ProfilesConfig;
use crate::engine::Cancellation;
use crate::models::ProfileDetail;
use crate::scraper::{Backoff, HttpFetch, ProfileFetcher};
use crate::utils::RateLimiter;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct ProfilePool {
    config: ProfilesConfig,
    base_url: String,
    max_retries: u32,
    cancel: Cancellation,
}

impl ProfilePool {
    pub fn new(config: ProfilesConfig, base_url: &str, max_retries: u32, cancel: Cancellation) -> Self {
        Self {
            config,
            base_url: base_url.to_string(),
            max_retries,
            cancel,
        }
    }

    /// Enrich every handle, returning details in the order of `handles`.
    /// Handles left in the queue when cancelled are skipped.
    pub async fn run<H, F>(&self, handles: &[String], make_http: F) -> Result<Vec<ProfileDetail>>
    where
        H: HttpFetch + 'static,
        F: Fn() -> Result<H>,
    {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let queue: VecDeque<(usize, String)> = handles.iter().cloned().enumerate().collect();
        let queue = Arc::new(Mutex::new(queue));
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            self.config.request_interval_ms,
        )));
        let workers = self.config.concurrency.clamp(1, handles.len());
        info!("Enriching {} profiles with {} workers", handles.len(), workers);

        let mut tasks = Vec::with_capacity(workers);
        for worker in 0..workers {
            let mut fetcher = ProfileFetcher::new(
                make_http()?,
                Backoff::new(&self.config.backoff),
                &self.base_url,
                self.max_retries,
                self.config.submission_pages,
            )?;
            let queue = Arc::clone(&queue);
            let limiter = Arc::clone(&limiter);
            let cancel = self.cancel.clone();

            let task = tokio::spawn(async move {
                let mut done = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        warn!("Worker {} stopping: cancelled", worker);
                        break;
                    }
                    let Some((index, handle)) = queue.lock().await.pop_front() else {
                        break;
                    };
                    limiter.acquire().await;
                    done.push((index, fetcher.fetch(&handle).await));
                }
                done
            });
            tasks.push((worker, task));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (worker, task) in tasks {
            match task.await {
                Ok(done) => results.extend(done),
                Err(e) => error!("Profile worker {} panicked: {}", worker, e),
            }
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, detail)| detail).collect())
    }
}
