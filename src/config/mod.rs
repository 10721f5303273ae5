use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub listing: ListingConfig,
    pub contest: ContestConfig,
    pub profiles: ProfilesConfig,
    pub storage: StorageConfig,
    pub run: RunConfig,
}

/// Transport settings shared by the browser renderer and the HTTP client
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub headless: bool,
    pub page_load_timeout_secs: u64,
    /// CSS class of the spinner the listing shows while its table loads.
    pub loading_indicator: String,
    pub settle_delay_ms: u64,
}

/// Retry delay for attempt k is `2^k * base_ms` plus a uniform jitter drawn
/// from `jitter_min_ms..=jitter_max_ms`. The jitter range alone is also the
/// pause between pages and between profile requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

/// Institution user listing (ratings table)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListingConfig {
    pub institution: String,
    pub max_pages: u32,
    pub page_size: usize,
    pub backoff: BackoffConfig,
}

/// Contest ranking listing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContestConfig {
    pub code: String,
    pub institution: String,
    pub max_pages: u32,
    pub page_size: usize,
    pub expected_problems: usize,
    pub backoff: BackoffConfig,
}

/// Per-handle profile enrichment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub concurrency: usize,
    pub request_interval_ms: u64,
    pub submission_pages: u32,
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Csv,
    Duckdb,
    Both,
}

impl StorageFormat {
    pub fn csv(self) -> bool {
        matches!(self, StorageFormat::Csv | StorageFormat::Both)
    }

    pub fn duckdb(self) -> bool {
        matches!(self, StorageFormat::Duckdb | StorageFormat::Both)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub format: StorageFormat,
    pub db_path: PathBuf,
}

/// Limits applied to a single extraction run
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock budget for one pagination run or one profile enrichment
    /// pass; unset means no deadline.
    pub deadline_secs: Option<u64>,
    /// Probe the page after a short page before stopping. Never blocks termination.
    pub confirm_last_page: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_INSTITUTION: &str = "Sri Eshwar College of Engineering, Kinathukadavu";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.codechef.com".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            max_retries: 3,
            headless: true,
            page_load_timeout_secs: 30,
            loading_indicator: "loadingIcon".to_string(),
            settle_delay_ms: 2000,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            jitter_min_ms: 5000,
            jitter_max_ms: 8000,
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            institution: DEFAULT_INSTITUTION.to_string(),
            max_pages: 20,
            page_size: 50,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            code: "START202D".to_string(),
            institution: DEFAULT_INSTITUTION.to_string(),
            max_pages: 20,
            page_size: 100,
            expected_problems: 8,
            backoff: BackoffConfig {
                base_ms: 1000,
                jitter_min_ms: 2000,
                jitter_max_ms: 5000,
            },
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            request_interval_ms: 5000,
            submission_pages: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            format: StorageFormat::Csv,
            db_path: PathBuf::from("data/rankscrape.duckdb"),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("RANKSCRAPE").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.listing.page_size, 50);
        assert_eq!(cfg.contest.page_size, 100);
        assert_eq!(cfg.contest.expected_problems, 8);
        assert_eq!(cfg.contest.backoff.jitter_min_ms, 2000);
        assert_eq!(cfg.profiles.backoff.jitter_max_ms, 8000);
        assert_eq!(cfg.storage.format, StorageFormat::Csv);
        assert!(cfg.run.deadline_secs.is_none());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml = r#"
            [listing]
            max_pages = 3

            [storage]
            format = "both"
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.listing.max_pages, 3);
        assert_eq!(cfg.listing.page_size, 50);
        assert!(cfg.storage.format.csv() && cfg.storage.format.duckdb());
    }
}
