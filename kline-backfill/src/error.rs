use thiserror::Error;

/// All errors generated in `kline-backfill`.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to build http client: {0}")]
    HttpClient(FetchError),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("fetch failed for {resolution} at startTime {start_time}: {source}")]
    Fetch {
        resolution: String,
        start_time: i64,
        #[source]
        source: FetchError,
    },
}

/// Errors raised while validating a [`BackfillConfig`](crate::config::BackfillConfig).
///
/// These are always fatal and surface before any upstream call is issued.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("symbol {0:?} contains characters outside [A-Za-z0-9_-]")]
    InvalidSymbol(String),

    #[error("at least one resolution must be configured")]
    NoResolutions,

    #[error("resolution {0:?} must be non-empty and ASCII alphanumeric")]
    InvalidResolution(String),

    #[error("resolution {0} is configured more than once")]
    DuplicateResolution(String),

    #[error("page limit {0} outside of 1..={max}", max = crate::config::MAX_PAGE_LIMIT)]
    PageLimit(usize),

    #[error("start date {0:?} is not a YYYY-MM-DD calendar date")]
    StartDate(String),

    #[error("start date {start} is after today ({today})")]
    StartDateInFuture { start: String, today: String },

    #[error("invalid base url {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("progress threshold must be greater than zero")]
    ProgressThreshold,
}

/// A single upstream page fetch failure.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FetchError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode: {0}")]
    Decode(String),
}

impl FetchError {
    /// Determine if a failed page fetch is worth retrying.
    ///
    /// Transport failures, rate limiting (429, and 418 for an IP ban in progress) and
    /// server side errors are retryable. Other client errors and undecodable bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => {
                matches!(status, 418 | 429) || (500..=599).contains(status)
            }
            FetchError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Status {
                status: status.as_u16(),
                body: value.to_string(),
            }
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Errors raised by the CSV output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}
