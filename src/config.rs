use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_DB_PATH: &str = "data/jobs.sqlite";

/// Page cap applied unless `unbounded` is asked for explicitly.
pub const DEFAULT_MAX_PAGES: usize = 50;
/// Largest accepted `nav_retries`.
pub const MAX_NAV_RETRIES: u32 = 10;

/// Spelling that lifts a page or time bound.
const UNBOUNDED: &str = "unbounded";

/// Timing and bounds for one crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Wait after the first navigation for client-side rendering.
    pub settle_delay: Duration,
    /// Wait after the first scroll for lazy-loaded cards.
    pub scroll_delay: Duration,
    pub scroll_fraction: f64,
    /// Inter-page backoff is drawn uniformly from `backoff_min..=backoff_max`.
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Extra attempts per navigation before the crawl fails. 0 means fail on first error.
    pub nav_retries: u32,
    pub retry_base: Duration,
    /// `None` only when unbounded was requested.
    pub max_pages: Option<usize>,
    pub deadline: Option<Duration>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            scroll_delay: Duration::from_secs(2),
            scroll_fraction: 0.5,
            backoff_min: Duration::from_secs(3),
            backoff_max: Duration::from_secs(6),
            nav_retries: 2,
            retry_base: Duration::from_secs(2),
            max_pages: Some(DEFAULT_MAX_PAGES),
            deadline: None,
        }
    }
}

impl CrawlConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `JOBS_*` variables from `lookup`.
    /// `JOBS_MAX_PAGES` and `JOBS_DEADLINE_SECS` also accept `unbounded`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(n) = parse_bound::<usize>(&lookup, "JOBS_MAX_PAGES")? {
            cfg.max_pages = n;
        }
        if let Some(secs) = parse_bound::<u64>(&lookup, "JOBS_DEADLINE_SECS")? {
            cfg.deadline = secs.map(Duration::from_secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "JOBS_BACKOFF_MIN_MS")? {
            cfg.backoff_min = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "JOBS_BACKOFF_MAX_MS")? {
            cfg.backoff_max = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "JOBS_NAV_RETRIES")? {
            cfg.nav_retries = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_min > self.backoff_max {
            bail!(
                "backoff range is empty: min {:?} > max {:?}",
                self.backoff_min,
                self.backoff_max
            );
        }
        if self.max_pages == Some(0) {
            bail!("max pages must be at least 1");
        }
        if self.nav_retries > MAX_NAV_RETRIES {
            bail!(
                "navigation retries {} above the limit of {}",
                self.nav_retries,
                MAX_NAV_RETRIES
            );
        }
        if !(0.0..=1.0).contains(&self.scroll_fraction) {
            bail!("scroll fraction {} outside 0..=1", self.scroll_fraction);
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {}={:?}", key, raw)),
        _ => Ok(None),
    }
}

/// Like `parse_var`, but `unbounded` parses to `Some(None)`.
fn parse_bound<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Option<T>>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if raw.trim().eq_ignore_ascii_case(UNBOUNDED) => Ok(Some(None)),
        _ => parse_var(lookup, key).map(|v| v.map(Some)),
    }
}

pub fn db_path() -> PathBuf {
    std::env::var("JOBS_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH))
}

pub fn chrome_path() -> Option<PathBuf> {
    std::env::var("CHROME_PATH").ok().map(PathBuf::from)
}
