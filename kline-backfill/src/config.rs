//! Immutable run configuration for a backfill.
//!
//! A [`BackfillConfig`] is built once (usually from the CLI), validated before any I/O, and
//! then shared read-only by the [`Backfill`](crate::backfill::Backfill) orchestrator.

use crate::error::ConfigError;
use chrono::{NaiveDate, NaiveTime};
use derive_more::Display;
use smol_str::SmolStr;
use std::{collections::HashSet, path::PathBuf, time::Duration};
use url::Url;

/// Maximum number of klines the upstream API returns per call.
pub const MAX_PAGE_LIMIT: usize = 1000;
pub const DEFAULT_PAGE_LIMIT: usize = MAX_PAGE_LIMIT;
pub const DEFAULT_INTER_CALL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_INTER_RESOLUTION_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_PROGRESS_THRESHOLD: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Format of the start date accepted on the command line and used in sink file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Bucket duration identifier passed verbatim to the upstream API (eg/ "1h", "1d").
///
/// The engine never interprets the duration itself.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
pub struct Resolution(pub SmolStr);

impl Resolution {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(SmolStr::new(value.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Resolution {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How failed page fetches are treated.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum FetchPolicy {
    /// A failed page is logged and treated as the end of history for that resolution.
    #[default]
    Lenient,
    /// Retryable failures are retried with exponential backoff, anything else (or exhausted
    /// retries) fails the resolution and aborts the run.
    Strict { max_retries: u32, backoff: Duration },
}

impl FetchPolicy {
    pub fn strict(max_retries: u32) -> Self {
        Self::Strict {
            max_retries,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub symbol: SmolStr,
    pub resolutions: Vec<Resolution>,
    pub start_date: NaiveDate,
    pub page_limit: usize,
    pub inter_call_delay: Duration,
    pub inter_resolution_delay: Duration,
    pub progress_threshold: Duration,
    pub base_url: String,
    pub request_timeout: Duration,
    pub output_dir: PathBuf,
    pub fetch_policy: FetchPolicy,
    pub resume: bool,
}

impl BackfillConfig {
    pub fn new(
        symbol: impl Into<SmolStr>,
        resolutions: impl IntoIterator<Item = Resolution>,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            resolutions: resolutions.into_iter().collect(),
            start_date,
            page_limit: DEFAULT_PAGE_LIMIT,
            inter_call_delay: DEFAULT_INTER_CALL_DELAY,
            inter_resolution_delay: DEFAULT_INTER_RESOLUTION_DELAY,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            output_dir: PathBuf::from("."),
            fetch_policy: FetchPolicy::default(),
            resume: false,
        }
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn with_inter_call_delay(mut self, delay: Duration) -> Self {
        self.inter_call_delay = delay;
        self
    }

    pub fn with_inter_resolution_delay(mut self, delay: Duration) -> Self {
        self.inter_resolution_delay = delay;
        self
    }

    pub fn with_progress_threshold(mut self, threshold: Duration) -> Self {
        self.progress_threshold = threshold;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Validate the configuration against `today` (UTC).
    pub fn validate(&self, today: NaiveDate) -> Result<(), ConfigError> {
        if self.symbol.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if !self
            .symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidSymbol(self.symbol.to_string()));
        }

        if self.resolutions.is_empty() {
            return Err(ConfigError::NoResolutions);
        }
        let mut seen = HashSet::with_capacity(self.resolutions.len());
        for resolution in &self.resolutions {
            let value = resolution.as_str();
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::InvalidResolution(value.to_string()));
            }
            if !seen.insert(resolution) {
                return Err(ConfigError::DuplicateResolution(value.to_string()));
            }
        }

        if !(1..=MAX_PAGE_LIMIT).contains(&self.page_limit) {
            return Err(ConfigError::PageLimit(self.page_limit));
        }

        if self.start_date > today {
            return Err(ConfigError::StartDateInFuture {
                start: self.start_date_label(),
                today: today.format(DATE_FORMAT).to_string(),
            });
        }

        if self.progress_threshold.is_zero() {
            return Err(ConfigError::ProgressThreshold);
        }

        let url = Url::parse(&self.base_url).map_err(|error| ConfigError::BaseUrl {
            url: self.base_url.clone(),
            reason: error.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::BaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        Ok(())
    }

    /// Inclusive start of the backfill: midnight UTC of the configured start date.
    pub fn start_time_ms(&self) -> i64 {
        self.start_date
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis()
    }

    pub fn start_date_label(&self) -> String {
        self.start_date.format(DATE_FORMAT).to_string()
    }

    pub fn progress_threshold_ms(&self) -> i64 {
        i64::try_from(self.progress_threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_start_date(input: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
        .map_err(|_| ConfigError::StartDate(input.to_string()))
}

/// Parse a comma separated resolution list, eg/ "1h,4h,12h,1d".
///
/// Blank entries are kept so that [`BackfillConfig::validate`] can reject them.
pub fn parse_resolutions(input: &str) -> Vec<Resolution> {
    input.split(',').map(Resolution::new).collect()
}
