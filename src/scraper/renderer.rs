use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{DomSnapshot, PageRenderer};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A single headless Chrome tab. The browser process lives exactly as long
/// as this value and is killed when it is dropped.
pub struct ChromeRenderer {
    _browser: Browser,
    tab: Arc<Tab>,
    loading_selector: String,
    load_timeout: Duration,
    settle_delay: Duration,
}

impl ChromeRenderer {
    /// Blocking: starts a Chrome process. Call from `spawn_blocking`.
    pub fn launch(config: &ScraperConfig) -> Result<Self> {
        let ua_arg = format!("--user-agent={}", config.user_agent);
        let args: Vec<&OsStr> = vec![
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--log-level=3"),
            OsStr::new(&ua_arg),
        ];

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false)
            .args(args)
            .idle_browser_timeout(Duration::from_secs(config.page_load_timeout_secs * 4))
            .build()
            .map_err(|e| anyhow!("Invalid browser launch options: {}", e))?;

        let browser = Browser::new(options).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        tab.set_user_agent(&config.user_agent, None, None)
            .context("Failed to set user agent")?;

        let load_timeout = Duration::from_secs(config.page_load_timeout_secs);
        tab.set_default_timeout(load_timeout);

        info!("Chrome started (headless={})", config.headless);

        Ok(Self {
            _browser: browser,
            tab,
            loading_selector: format!(".{}", config.loading_indicator),
            load_timeout,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
        })
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render_page(&self, url: &str) -> Result<DomSnapshot, FetchError> {
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();
        let loading = self.loading_selector.clone();
        let timeout = self.load_timeout;
        let settle = self.settle_delay;

        tokio::task::spawn_blocking(move || -> Result<DomSnapshot, FetchError> {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| FetchError::Render(format!("{}: {}", url, e)))?;

            wait_until_absent(&tab, &loading, timeout)?;
            // The spinner can vanish a beat before the table paints.
            std::thread::sleep(settle);

            let html = tab
                .get_content()
                .map_err(|e| FetchError::Render(format!("reading DOM of {}: {}", url, e)))?;
            Ok(DomSnapshot { url, html })
        })
        .await
        .map_err(|e| FetchError::Render(format!("render task failed: {}", e)))?
    }
}

fn wait_until_absent(tab: &Tab, selector: &str, timeout: Duration) -> Result<(), FetchError> {
    let deadline = Instant::now() + timeout;
    while tab.find_element(selector).is_ok() {
        if Instant::now() >= deadline {
            return Err(FetchError::Timeout(format!(
                "{} still present after {:?}",
                selector, timeout
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    debug!("{} gone", selector);
    Ok(())
}
