use clap::Parser;
use kline_backfill::{
    Backfill, BackfillConfig, BackfillError, BinanceKlineClient, FetchPolicy,
    config::{
        DEFAULT_BASE_URL, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_LIMIT, parse_resolutions,
        parse_start_date,
    },
    logging::init_logging,
};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::{error, info, warn};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backfill historical klines (OHLCV) from the Binance REST API into CSV files.
#[derive(Debug, Parser)]
#[command(name = "kline-backfill", version, about)]
struct Cli {
    /// Instrument to backfill, eg/ BTCUSDT
    #[arg(long, env = "KLINE_BACKFILL_SYMBOL", default_value = "BTCUSDT")]
    symbol: String,

    /// Comma separated resolutions, processed in order
    #[arg(long, env = "KLINE_BACKFILL_RESOLUTIONS", default_value = "1h,4h,12h,1d")]
    resolutions: String,

    /// Inclusive start date (YYYY-MM-DD, UTC)
    #[arg(long, env = "KLINE_BACKFILL_START_DATE", default_value = "2018-01-01")]
    start_date: String,

    /// Klines requested per call (max 1000)
    #[arg(long, env = "KLINE_BACKFILL_PAGE_LIMIT", default_value_t = DEFAULT_PAGE_LIMIT)]
    page_limit: usize,

    /// Delay after every upstream call
    #[arg(long, env = "KLINE_BACKFILL_INTER_CALL_DELAY_MS", default_value_t = 500)]
    inter_call_delay_ms: u64,

    /// Delay between resolutions
    #[arg(long, env = "KLINE_BACKFILL_INTER_RESOLUTION_DELAY_MS", default_value_t = 2000)]
    inter_resolution_delay_ms: u64,

    /// Log progress every time the cursor advances this many days of bucket time
    #[arg(long, env = "KLINE_BACKFILL_PROGRESS_THRESHOLD_DAYS", default_value_t = 30)]
    progress_threshold_days: u32,

    /// Directory the CSV files (and checkpoints) are written to
    #[arg(long, env = "KLINE_BACKFILL_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Upstream REST base url
    #[arg(long, env = "KLINE_BACKFILL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Per-request timeout
    #[arg(long, env = "KLINE_BACKFILL_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Retry transient fetch failures and fail the run instead of stopping the resolution early
    #[arg(long, env = "KLINE_BACKFILL_STRICT")]
    strict: bool,

    /// Retries per page in strict mode
    #[arg(long, env = "KLINE_BACKFILL_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Checkpoint every page, and resume from the checkpoint of an earlier resumable run on the
    /// same day
    #[arg(long, env = "KLINE_BACKFILL_RESUME")]
    resume: bool,

    /// Emit logs as JSON
    #[arg(long, env = "KLINE_BACKFILL_JSON_LOGS")]
    json: bool,
}

impl Cli {
    fn into_config(self) -> Result<BackfillConfig, BackfillError> {
        let start_date = parse_start_date(&self.start_date)?;
        let fetch_policy = if self.strict {
            FetchPolicy::strict(self.max_retries)
        } else {
            FetchPolicy::Lenient
        };

        Ok(
            BackfillConfig::new(self.symbol, parse_resolutions(&self.resolutions), start_date)
                .with_page_limit(self.page_limit)
                .with_inter_call_delay(Duration::from_millis(self.inter_call_delay_ms))
                .with_inter_resolution_delay(Duration::from_millis(self.inter_resolution_delay_ms))
                .with_progress_threshold(DAY * self.progress_threshold_days)
                .with_output_dir(self.output_dir)
                .with_base_url(self.base_url)
                .with_request_timeout(Duration::from_secs(self.timeout_secs))
                .with_fetch_policy(fetch_policy)
                .with_resume(self.resume),
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "kline backfill aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BackfillError> {
    let config = cli.into_config()?;
    let resume = config.resume;
    let client = BinanceKlineClient::from_config(&config)?;

    let backfill = Backfill::new(config, client)?;

    let cancel = backfill.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the in-flight page");
            cancel.cancel();
        }
    });

    let summary = backfill.run().await?;
    if !summary.is_complete() {
        if resume {
            info!("some resolutions stopped before reaching the horizon, re-run to continue");
        } else {
            info!("some resolutions stopped before reaching the horizon");
        }
    }

    Ok(())
}
