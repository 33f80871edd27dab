//! Backfill orchestrator: drives the pagination loop for every configured resolution.
//!
//! Resolutions are processed strictly one after another, and within a resolution exactly one
//! upstream call is outstanding at a time. Every call is followed by the configured inter-call
//! delay, and consecutive resolutions are separated by the inter-resolution delay, so a single
//! run never exceeds the upstream rate limit shared by all resolutions of a symbol.

use crate::{
    checkpoint::Checkpoint,
    client::{KlineSource, PageOutcome, PageRequest, fetch_outcome},
    clock::{Clock, SystemClock},
    config::{BackfillConfig, DATE_FORMAT, FetchPolicy, Resolution},
    cursor::{BackfillCursor, ResolutionState},
    error::{BackfillError, FetchError},
    pacer::{Pacer, TokioPacer},
    sink::{KlineSink, SinkId},
};
use chrono::DateTime;
use itertools::Itertools;
use smol_str::SmolStr;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one resolution's pagination loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    pub sink: PathBuf,
    pub state: ResolutionState,
    /// Rows in the sink, including rows carried over from a resumed checkpoint.
    pub rows: u64,
    pub next_start: i64,
    pub horizon: i64,
    pub failure: Option<FetchError>,
}

impl ResolutionReport {
    /// Whether the cursor reached the horizon, ie/ the sink holds the full history.
    pub fn is_complete(&self) -> bool {
        self.state == ResolutionState::Exhausted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub symbol: SmolStr,
    pub reports: Vec<ResolutionReport>,
}

impl RunSummary {
    pub fn total_rows(&self) -> u64 {
        self.reports.iter().map(|report| report.rows).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.reports.iter().all(ResolutionReport::is_complete)
    }
}

enum Fetched {
    Outcome(PageOutcome),
    Cancelled,
}

/// Historical kline backfill for one symbol across its configured resolutions.
pub struct Backfill<Source, Pace = TokioPacer, Clk = SystemClock> {
    config: BackfillConfig,
    source: Source,
    pacer: Pace,
    clock: Clk,
    cancel: CancellationToken,
}

impl<Source> Backfill<Source>
where
    Source: KlineSource,
{
    /// Construct a [`Backfill`] that sleeps on the tokio timer and reads the system clock.
    pub fn new(config: BackfillConfig, source: Source) -> Result<Self, BackfillError> {
        Self::with_parts(config, source, TokioPacer, SystemClock)
    }
}

impl<Source, Pace, Clk> Backfill<Source, Pace, Clk>
where
    Source: KlineSource,
    Pace: Pacer,
    Clk: Clock,
{
    /// Validates `config` against the clock's current date before any I/O happens.
    pub fn with_parts(
        config: BackfillConfig,
        source: Source,
        pacer: Pace,
        clock: Clk,
    ) -> Result<Self, BackfillError> {
        config.validate(clock.today())?;
        Ok(Self {
            config,
            source,
            pacer,
            clock,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Backfill every configured resolution in order.
    ///
    /// Per-page fetch failures never fail the run under [`FetchPolicy::Lenient`]; they only end
    /// the current resolution early. Sink and checkpoint I/O errors are always fatal.
    pub async fn run(&self) -> Result<RunSummary, BackfillError> {
        info!(
            symbol = %self.config.symbol,
            resolutions = %self.config.resolutions.iter().join(","),
            start_date = %self.config.start_date_label(),
            "kline backfill starting"
        );

        let mut summary = RunSummary {
            symbol: self.config.symbol.clone(),
            reports: Vec::with_capacity(self.config.resolutions.len()),
        };

        for (index, resolution) in self.config.resolutions.iter().enumerate() {
            if index > 0
                && !self
                    .pacer
                    .pause(self.config.inter_resolution_delay, &self.cancel)
                    .await
            {
                info!(symbol = %self.config.symbol, "kline backfill cancelled between resolutions");
                break;
            }

            let report = self.run_resolution(resolution).await?;
            let state = report.state;
            let failure = report.failure.clone();
            let next_start = report.next_start;
            summary.reports.push(report);

            match state {
                ResolutionState::Failed => {
                    log_summary(&summary);
                    return Err(BackfillError::Fetch {
                        resolution: resolution.to_string(),
                        start_time: next_start,
                        source: failure.unwrap_or_else(|| {
                            FetchError::Transport("unknown fetch failure".to_string())
                        }),
                    });
                }
                ResolutionState::Cancelled => break,
                _ => {}
            }
        }

        log_summary(&summary);
        Ok(summary)
    }

    /// Run the pagination loop for a single resolution with a fresh sink and cursor.
    ///
    /// The horizon is sampled from the clock once, here, and stays fixed for the whole loop.
    pub async fn run_resolution(
        &self,
        resolution: &Resolution,
    ) -> Result<ResolutionReport, BackfillError> {
        let horizon = self.clock.now_ms();
        let today = self.clock.today().format(DATE_FORMAT).to_string();
        let start_label = self.config.start_date_label();
        let sink_id = SinkId::new(&self.config.symbol, resolution, &start_label, &today);
        let checkpoint_path = Checkpoint::path_in(&self.config.output_dir, &sink_id);

        let (mut sink, mut cursor) = self.open(resolution, &sink_id, &checkpoint_path, horizon)?;

        info!(
            symbol = %cursor.symbol,
            resolution = %resolution,
            path = %sink.path().display(),
            state = %ResolutionState::Running,
            next_start = cursor.next_start,
            horizon,
            "backfill of resolution started"
        );

        let mut failure = None;
        let state = loop {
            if cursor.is_exhausted() {
                break ResolutionState::Exhausted;
            }
            if self.cancel.is_cancelled() {
                break ResolutionState::Cancelled;
            }

            let request = PageRequest {
                symbol: cursor.symbol.clone(),
                resolution: resolution.clone(),
                start_time: cursor.next_start,
                limit: self.config.page_limit,
            };

            let klines = match self.fetch(&request).await {
                Fetched::Outcome(PageOutcome::Page(klines)) => klines,
                Fetched::Outcome(PageOutcome::EndOfData) => {
                    info!(
                        symbol = %cursor.symbol,
                        resolution = %resolution,
                        next_start = cursor.next_start,
                        "upstream returned no more klines"
                    );
                    break ResolutionState::StoppedNoData;
                }
                Fetched::Outcome(PageOutcome::Failed(error)) => match self.config.fetch_policy {
                    FetchPolicy::Lenient => {
                        warn!(
                            symbol = %cursor.symbol,
                            resolution = %resolution,
                            next_start = cursor.next_start,
                            %error,
                            "kline page fetch failed, treating as end of data"
                        );
                        break ResolutionState::StoppedNoData;
                    }
                    FetchPolicy::Strict { .. } => {
                        error!(
                            symbol = %cursor.symbol,
                            resolution = %resolution,
                            next_start = cursor.next_start,
                            %error,
                            "kline page fetch failed"
                        );
                        failure = Some(error);
                        break ResolutionState::Failed;
                    }
                },
                Fetched::Cancelled => break ResolutionState::Cancelled,
            };

            let rows = sink.append(&klines)?;
            cursor.advance(&klines);
            if self.config.resume {
                Checkpoint::new(&sink_id, &start_label, &cursor, sink.persisted_len()?)
                    .store(&checkpoint_path)?;
            }

            debug!(
                symbol = %cursor.symbol,
                resolution = %resolution,
                rows,
                total = cursor.total_count,
                next_start = cursor.next_start,
                "kline page persisted"
            );

            if cursor.take_progress(self.config.progress_threshold_ms()) {
                info!(
                    symbol = %cursor.symbol,
                    resolution = %resolution,
                    total = cursor.total_count,
                    until = %klines
                        .last()
                        .and_then(|kline| kline.close_datetime())
                        .map(|time| time.to_rfc3339())
                        .unwrap_or_default(),
                    "backfill progress"
                );
            }

            if !self
                .pacer
                .pause(self.config.inter_call_delay, &self.cancel)
                .await
            {
                break ResolutionState::Cancelled;
            }
        };

        if self.config.resume && state == ResolutionState::Exhausted {
            Checkpoint::clear(&checkpoint_path)?;
        }

        info!(
            symbol = %cursor.symbol,
            resolution = %resolution,
            state = %state,
            total = cursor.total_count,
            next_start = cursor.next_start,
            horizon,
            "backfill of resolution finished"
        );

        Ok(ResolutionReport {
            resolution: resolution.clone(),
            sink: sink.path().to_path_buf(),
            state,
            rows: cursor.total_count,
            next_start: cursor.next_start,
            horizon,
            failure,
        })
    }

    /// Open the sink and cursor for a resolution, resuming from a checkpoint when enabled and
    /// possible, otherwise resetting the sink.
    fn open(
        &self,
        resolution: &Resolution,
        sink_id: &SinkId,
        checkpoint_path: &Path,
        horizon: i64,
    ) -> Result<(KlineSink, BackfillCursor), BackfillError> {
        let dir = &self.config.output_dir;
        let symbol = self.config.symbol.clone();

        if self.config.resume {
            if let Some(resumed) = self.resume(resolution, sink_id, checkpoint_path, horizon) {
                return Ok(resumed);
            }
        }

        let sink = KlineSink::create(dir, sink_id)?;
        if self.config.resume {
            Checkpoint::clear(checkpoint_path)?;
        }
        let start = self.config.start_time_ms();
        let cursor = BackfillCursor::new(symbol, resolution.clone(), start, horizon);
        Ok((sink, cursor))
    }

    /// Reopen the sink and cursor from a checkpoint written by an earlier run, if it matches.
    fn resume(
        &self,
        resolution: &Resolution,
        sink_id: &SinkId,
        checkpoint_path: &Path,
        horizon: i64,
    ) -> Option<(KlineSink, BackfillCursor)> {
        let dir = &self.config.output_dir;
        let symbol = &self.config.symbol;
        let start_label = self.config.start_date_label();

        let checkpoint = match Checkpoint::load(checkpoint_path) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return None,
            Err(error) => {
                warn!(
                    symbol = %symbol,
                    resolution = %resolution,
                    %error,
                    "checkpoint unreadable, restarting from start date"
                );
                return None;
            }
        };

        if !checkpoint.matches(sink_id, symbol, resolution.as_str(), &start_label) {
            warn!(
                symbol = %symbol,
                resolution = %resolution,
                "checkpoint does not match this run, restarting from start date"
            );
            return None;
        }

        let sink = match KlineSink::resume(dir, sink_id, checkpoint.sink_len) {
            Ok(sink) => sink,
            Err(error) => {
                warn!(
                    symbol = %symbol,
                    resolution = %resolution,
                    %error,
                    "sink does not match checkpoint, restarting from start date"
                );
                return None;
            }
        };

        info!(
            symbol = %symbol,
            resolution = %resolution,
            next_start = checkpoint.next_start,
            rows = checkpoint.total_count,
            "resuming from checkpoint"
        );
        let cursor = BackfillCursor::resumed(
            symbol.clone(),
            resolution.clone(),
            checkpoint.next_start,
            checkpoint.total_count,
            horizon,
        );
        Some((sink, cursor))
    }

    async fn fetch(&self, request: &PageRequest) -> Fetched {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Fetched::Cancelled,
                outcome = fetch_outcome(&self.source, request) => outcome,
            };

            let FetchPolicy::Strict {
                max_retries,
                backoff,
            } = self.config.fetch_policy
            else {
                return Fetched::Outcome(outcome);
            };

            match outcome {
                PageOutcome::Failed(error) if error.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = retry_delay(backoff, attempt).max(self.config.inter_call_delay);
                    warn!(
                        symbol = %request.symbol,
                        resolution = %request.resolution,
                        start_time = request.start_time,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying kline page fetch"
                    );
                    if !self.pacer.pause(delay, &self.cancel).await {
                        return Fetched::Cancelled;
                    }
                }
                outcome => return Fetched::Outcome(outcome),
            }
        }
    }
}

/// Exponential backoff: `backoff * 2^(attempt - 1)`, saturating.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    backoff.saturating_mul(factor)
}

fn log_summary(summary: &RunSummary) {
    for report in &summary.reports {
        info!(
            symbol = %summary.symbol,
            resolution = %report.resolution,
            state = %report.state,
            rows = report.rows,
            complete = report.is_complete(),
            reached = %DateTime::from_timestamp_millis(report.next_start)
                .map(|time| time.to_rfc3339())
                .unwrap_or_default(),
            path = %report.sink.display(),
            "resolution summary"
        );
    }
    info!(
        symbol = %summary.symbol,
        resolutions = summary.reports.len(),
        total_rows = summary.total_rows(),
        complete = summary.is_complete(),
        "kline backfill finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay() {
        struct TestCase {
            attempt: u32,
            expected: Duration,
        }

        let backoff = Duration::from_millis(500);
        let tests = vec![
            // TC0: first retry waits the base backoff
            TestCase {
                attempt: 1,
                expected: Duration::from_millis(500),
            },
            // TC1: doubles
            TestCase {
                attempt: 2,
                expected: Duration::from_millis(1000),
            },
            // TC2: doubles again
            TestCase {
                attempt: 4,
                expected: Duration::from_millis(4000),
            },
            // TC3: saturates instead of overflowing
            TestCase {
                attempt: 200,
                expected: backoff.saturating_mul(u32::MAX),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = retry_delay(backoff, test.attempt);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
