//! Retry policy shared by every fetch site.
//!
//! `next_delay(k)` is `2^k * base + jitter`, jitter drawn uniformly from the
//! configured range. Each worker owns its own `Backoff` and with it its own
//! random source.

use crate::config::BackoffConfig;
use crate::error::{FetchError, ScrapeError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

const MIN_DELAY: Duration = Duration::from_millis(1);
const MAX_EXPONENT: u32 = 16;

pub struct Backoff {
    base: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic jitter, for tests.
    pub fn seeded(config: &BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BackoffConfig, rng: StdRng) -> Self {
        let (lo, hi) = if config.jitter_min_ms <= config.jitter_max_ms {
            (config.jitter_min_ms, config.jitter_max_ms)
        } else {
            (config.jitter_max_ms, config.jitter_min_ms)
        };
        Self {
            base: Duration::from_millis(config.base_ms),
            jitter_min: Duration::from_millis(lo),
            jitter_max: Duration::from_millis(hi),
            rng,
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based).
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(MAX_EXPONENT));
        let exponential = self.base.saturating_mul(factor);
        (exponential + self.jitter()).max(MIN_DELAY)
    }

    /// Jittered pause used between pages and between profile requests.
    pub fn pause(&mut self) -> Duration {
        self.jitter().max(MIN_DELAY)
    }

    fn jitter(&mut self) -> Duration {
        if self.jitter_max > self.jitter_min {
            self.rng.random_range(self.jitter_min..=self.jitter_max)
        } else {
            self.jitter_min
        }
    }

    /// Delays between `max_attempts` attempts; one fewer than the attempts.
    pub fn schedule(&mut self, max_attempts: u32) -> Vec<Duration> {
        (0..max_attempts.max(1) - 1).map(|k| self.next_delay(k)).collect()
    }
}

/// Run `op` up to `max_attempts` times, sleeping per `backoff` between
/// transient failures. Permanent failures stop immediately.
pub async fn retry<T, F, Fut>(
    backoff: &mut Backoff,
    max_attempts: u32,
    what: &str,
    mut op: F,
) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let schedule = backoff.schedule(max_attempts);
    let total = schedule.len() as u32 + 1;
    let mut attempts = 0u32;

    let result = RetryIf::spawn(
        schedule,
        || {
            attempts += 1;
            let attempt = attempts;
            let fut = op();
            async move {
                debug!("{} (attempt {}/{})", what, attempt, total);
                let res = fut.await;
                if let Err(e) = &res {
                    warn!("Attempt {}/{} failed for {}: {}", attempt, total, what, e);
                }
                res
            }
        },
        FetchError::is_transient,
    )
    .await;

    result.map_err(|source| ScrapeError::TransientFetch {
        what: what.to_string(),
        attempts,
        source,
    })
}
