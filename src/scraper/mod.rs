pub mod backoff;
pub mod cleaner;
pub mod http_client;
pub mod listing;
pub mod parsers;
pub mod profile;
pub mod renderer;

use crate::error::FetchError;
use async_trait::async_trait;

pub use self::backoff::Backoff;
pub use self::http_client::HttpClient;
pub use self::listing::{ContestRankings, InstitutionUsers, Listing};
pub use self::profile::ProfileFetcher;
pub use self::renderer::ChromeRenderer;

/// Rendered page source, read after the page finished loading.
#[derive(Debug, Clone)]
pub struct DomSnapshot {
    pub url: String,
    pub html: String,
}

// ── Source traits ─────────────────────────────────────────────────────────────

/// Browser-backed page rendering. Not reentrant: one page at a time.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_page(&self, url: &str) -> Result<DomSnapshot, FetchError>;
}

/// Plain HTTP GET for profile pages and the submissions feed.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, FetchError>;
}
